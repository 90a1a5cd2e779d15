use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use flate2::read::GzDecoder;
use log::info;
use serde_json::json;

use state_estimation_rs::{EsEkf, EstimatorConfig, SensorLog};

#[derive(Parser, Debug)]
#[command(name = "state_estimator", about = "Run the ES-EKF over a recorded sensor log")]
struct Args {
    /// Path to sensor log (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// Optional JSON config (filter noise, LIDAR calibration, controller gains)
    #[arg(long)]
    config: Option<PathBuf>,

    /// IMU step indices whose position estimates are exported
    #[arg(long, value_delimiter = ',', default_value = "6800,7600,8400,9200,10000")]
    indices: Vec<usize>,

    /// Estimates output file
    #[arg(long, default_value = "estimates.txt")]
    output: PathBuf,

    /// Write an error report against ground truth as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn load_log(path: &Path) -> anyhow::Result<SensorLog> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let log = serde_json::from_reader(BufReader::new(reader))
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(log)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => EstimatorConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EstimatorConfig::default(),
    };

    let (gt, sensors) = load_log(&args.log)?.into_parts(&config.calibration);
    info!(
        "loaded {}: {} IMU, {} GNSS, {} LIDAR samples",
        args.log.display(),
        sensors.imu_f.len(),
        sensors.gnss.len(),
        sensors.lidar.len()
    );

    let mut ekf = EsEkf::new(config.filter.clone())?;
    let trajectory = ekf.run(&gt, &sensors)?;

    trajectory.save_estimates(&args.indices, &args.output)?;
    info!(
        "wrote {} position estimates to {}",
        args.indices.len(),
        args.output.display()
    );

    let report = trajectory.error_report(&gt);
    info!(
        "position RMSE [m]: {:.3} {:.3} {:.3} | within 3σ: {:.1}%",
        report.position_rmse[0],
        report.position_rmse[1],
        report.position_rmse[2],
        report.within_3sigma * 100.0
    );

    if let Some(path) = args.report.as_ref() {
        let summary = json!({
            "log": args.log.display().to_string(),
            "steps": trajectory.len(),
            "gnss_updates": ekf.gnss_updates(),
            "lidar_updates": ekf.lidar_updates(),
            "report": report,
        });
        fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        info!("wrote error report to {}", path.display());
    }
    Ok(())
}
