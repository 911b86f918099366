//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `repokit_core` linkage.
//! - Drive one full layer lifecycle (init, health, defer) against the
//!   configured store and print the health report as JSON.
//!
//! Usage: `repokit_cli [config.json]`

use log::info;
use repokit_core::{BusinessLayer, Context, CoreConfig, DataLayer, Layer};
use std::process::ExitCode;
use std::time::Duration;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    println!("repokit_core ping={}", repokit_core::ping());
    println!("repokit_core version={}", repokit_core::core_version());

    match run(std::env::args().nth(1)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(message) => {
            eprintln!("repokit_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<String>) -> Result<bool, String> {
    let config = match config_path {
        Some(path) => CoreConfig::load(&path).map_err(|err| err.to_string())?,
        None => CoreConfig::default(),
    };
    if repokit_core::init_logging(&config.logging).map_err(|err| err.to_string())? {
        if let Some((level, dir)) = repokit_core::active_logging() {
            println!("logging level={level} dir={}", dir.display());
        }
    }

    let data = DataLayer::open(&config.store).map_err(|err| err.to_string())?;
    let business = BusinessLayer::new("business", data);

    let request_id = format!("cli-{}", std::process::id());
    let ctx = || Context::with_timeout(HEALTH_TIMEOUT).with_request_id(&request_id);
    let init = business.init_layer(&ctx());
    let report = business.health(&ctx());
    business.defer();
    init.map_err(|err| err.to_string())?;

    let rendered = serde_json::to_string_pretty(&report).map_err(|err| err.to_string())?;
    println!("{rendered}");
    info!(
        "event=cli_health module=cli status={} layer={} request_id={}",
        if report.healthy { "ok" } else { "error" },
        report.layer,
        request_id
    );
    Ok(report.healthy)
}
