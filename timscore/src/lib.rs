// data module
pub mod data {
    pub mod peak;
    pub mod spectrum;
}

// algorithm module
pub mod algorithm {
    pub mod merge;
}

// timstof module
pub mod timstof {
    pub mod spectrum_processing;
}
