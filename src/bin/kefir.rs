//! Entry point of the kefir compiler driver.

use clap::Parser;
use kefir_cli::{Driver, DriverConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    let config = DriverConfig::parse();
    let json_errors = config.json_errors;
    let driver = Driver::new(config);
    match driver.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_errors {
                eprintln!("{{\"error\": \"{}\"}}", err.to_string().replace('"', "'"));
            } else {
                eprintln!("kefir: error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
