use std::fmt::Display;

/// Acquisition scheme of a run, taken from `Frames.ScanMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    MS,
    MRM,
    DDA,
    DIA,
    Unknown(i64),
}

impl AcquisitionMode {
    pub fn to_i64(&self) -> i64 {
        match self {
            AcquisitionMode::MS => 0,
            AcquisitionMode::MRM => 2,
            AcquisitionMode::DDA => 8,
            AcquisitionMode::DIA => 9,
            AcquisitionMode::Unknown(code) => *code,
        }
    }

    pub fn to_str(&self) -> &str {
        match self {
            AcquisitionMode::MS => "MS",
            AcquisitionMode::MRM => "MRM",
            AcquisitionMode::DDA => "DDA",
            AcquisitionMode::DIA => "DIA",
            AcquisitionMode::Unknown(_) => "UNKNOWN",
        }
    }

    /// Modes the scan builder can reconstruct.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            AcquisitionMode::MS | AcquisitionMode::MRM | AcquisitionMode::DDA
        )
    }
}

impl Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionMode::Unknown(code) => write!(f, "UNKNOWN({})", code),
            other => write!(f, "{}", other.to_str()),
        }
    }
}

impl From<i64> for AcquisitionMode {
    fn from(item: i64) -> Self {
        match item {
            0 => AcquisitionMode::MS,
            2 => AcquisitionMode::MRM,
            8 => AcquisitionMode::DDA,
            9 => AcquisitionMode::DIA,
            code => AcquisitionMode::Unknown(code),
        }
    }
}

impl From<&str> for AcquisitionMode {
    fn from(item: &str) -> Self {
        match item {
            "MS" => AcquisitionMode::MS,
            "MRM" => AcquisitionMode::MRM,
            "DDA" => AcquisitionMode::DDA,
            "DIA" => AcquisitionMode::DIA,
            _ => AcquisitionMode::Unknown(-1),
        }
    }
}

/// Per-frame fragmentation type, taken from `Frames.MsMsType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsMsType {
    MS1,
    MRM,
    DDAPASEF,
    DIAPASEF,
    PRMPASEF,
    Unknown(i64),
}

impl MsMsType {
    pub fn ms_level(&self) -> u8 {
        match self {
            MsMsType::MS1 => 1,
            _ => 2,
        }
    }
}

impl From<i64> for MsMsType {
    fn from(item: i64) -> Self {
        match item {
            0 => MsMsType::MS1,
            2 => MsMsType::MRM,
            8 => MsMsType::DDAPASEF,
            9 => MsMsType::DIAPASEF,
            10 => MsMsType::PRMPASEF,
            code => MsMsType::Unknown(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_mode_codes() {
        assert_eq!(AcquisitionMode::from(8), AcquisitionMode::DDA);
        assert_eq!(AcquisitionMode::from(2).to_str(), "MRM");
        assert_eq!(AcquisitionMode::from(4).to_i64(), 4);
        assert!(!AcquisitionMode::from(9).is_supported());
        assert_eq!(AcquisitionMode::from("DDA"), AcquisitionMode::DDA);
        assert_eq!(AcquisitionMode::Unknown(4).to_string(), "UNKNOWN(4)");
    }

    #[test]
    fn test_ms_ms_type_level() {
        assert_eq!(MsMsType::from(0).ms_level(), 1);
        assert_eq!(MsMsType::from(8).ms_level(), 2);
    }
}
