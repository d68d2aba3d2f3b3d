use clap::Parser;
use std::path::PathBuf;

use timscore::algorithm::merge::Tolerance;
use timscore::data::spectrum::MsOrder;

use timsdf::config::ReaderConfig;
use timsdf::data::dataset::TimsDataset;
use timsdf::error::Result;

/// Reconstructs the scans of a Bruker timsTOF `.d` directory and prints a summary.
#[derive(Parser, Debug)]
#[command(name = "timsdf")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The `.d` directory
    #[arg(value_name = "DATA_PATH")]
    data_path: PathBuf,

    /// Reader options as JSON, command line flags override them
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Native timsdata library, frames are read from analysis.tdf_bin without it
    #[arg(long)]
    bruker_lib: Option<PathBuf>,

    #[arg(short, long)]
    threads: Option<usize>,

    /// Merge tolerance in ppm
    #[arg(long)]
    ppm: Option<f64>,

    /// Print every scan
    #[arg(short, long)]
    list: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str())).init();

    let mut config = match &args.config {
        Some(path) => ReaderConfig::from_json_file(path)?,
        None => ReaderConfig::default(),
    };
    if let Some(lib) = args.bruker_lib {
        config.bruker_lib_path = Some(lib);
    }
    if let Some(threads) = args.threads {
        config.max_threads = threads;
    }
    if let Some(ppm) = args.ppm {
        config.tolerance = Tolerance::Ppm(ppm);
    }

    let dataset = TimsDataset::open(&args.data_path, config)?;
    let scans = dataset.load_all_scans()?;

    if args.list {
        for scan in &scans.scans {
            println!("{}", scan);
        }
    }

    let linked = scans
        .scans
        .iter()
        .filter(|s| s.parent_scan_number.is_some())
        .count();

    println!("{}: {} acquisition, {} frames", args.data_path.display(), scans.mode, dataset.frame_count());
    println!("  MS1 scans:      {}", scans.count(MsOrder::Ms1));
    println!("  MS2 scans:      {}", scans.count(MsOrder::Ms2));
    println!("  linked to MS1:  {}", linked);
    println!("  faulty frames:  {:?}", scans.faulty_frames);
    Ok(())
}
