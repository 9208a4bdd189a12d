//! Adds two device-filled arrays on the system GPU and verifies the sums.
//!
//! Usage: `array_adder [config.json]`. Without a path the default
//! configuration is used. Set `RUST_LOG` to change the log level. The
//! verification report is printed to stdout as JSON.

use std::process::ExitCode;

use array_adder::errors::AdderResult;
use array_adder::{AdderConfig, VerificationReport, WgpuDevice, run};
use log::{error, info};

fn load_config() -> AdderResult<AdderConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            Ok(AdderConfig::from_file(&path)?)
        }
        None => Ok(AdderConfig::default()),
    }
}

fn execute() -> AdderResult<VerificationReport> {
    let config = load_config()?;
    let device = WgpuDevice::system_default()?;
    run(device, &config)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match execute() {
        Ok(report) => {
            if report.is_success() {
                info!("All {} elements verified", report.checked);
            } else {
                info!(
                    "{} of {} elements mismatched",
                    report.mismatch_count, report.checked
                );
            }
            match serde_json::to_string(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to serialize the report: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
