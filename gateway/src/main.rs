//! LensGate - Entry Point
//!
//! Camera fleet gateway module: provisions per-camera cloud identities,
//! proxies their hub connections, and drives detection pipelines on a paired
//! pipeline module.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use lensgate::app::options::{AppOptions, ServerOptions};
use lensgate::app::run::run;
use lensgate::fleet::orchestrator::FleetOptions;
use lensgate::hub::mqtt;
use lensgate::logs::{init_logging, LogOptions};
use lensgate::storage::layout::StorageLayout;
use lensgate::storage::settings::Settings;
use lensgate::utils::version_info;
use lensgate::workers::health;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    // Retrieve the settings file; a missing file keeps the defaults
    let settings_path = cli_args
        .get("settings")
        .map(PathBuf::from)
        .unwrap_or_else(|| StorageLayout::default().settings_file());
    let mut settings = match Settings::load(&settings_path).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "Unable to read settings file {}: {}",
                settings_path.display(),
                e
            );
            return;
        }
    };

    // CLI log level wins over the settings file
    if let Some(level) = cli_args.get("log-level") {
        match level.parse() {
            Ok(level) => settings.log_level = level,
            Err(_) => eprintln!("Unknown log level: {level}"),
        }
    }

    let layout = settings.storage_layout();

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        file_output: settings.log_to_file,
        log_dir: layout.logs_dir().path().to_path_buf(),
        json_format: settings.log_json,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the gateway
    let content_dir = settings
        .storage
        .content_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| layout.content_dir().path().to_path_buf());
    let options = AppOptions {
        module_connection_string: settings.module_connection_string(),
        enable_server: settings.server.enable,
        server: ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        fleet: FleetOptions {
            content_dir,
            first_sync_timeout: Duration::from_secs(settings.health.first_sync_timeout_secs),
            health_check_retries: settings.health.check_retries,
            restart_grace: Duration::from_secs(settings.health.restart_grace_secs),
        },
        hub: mqtt::Options {
            sas_ttl_secs: settings.hub.sas_ttl_secs as i64,
            ca_cert_path: settings.hub.ca_cert_path.clone(),
            ..Default::default()
        },
        health_worker: health::Options {
            check_interval: Duration::from_secs(settings.health.check_interval_secs),
            ..Default::default()
        },
        layout,
        ..Default::default()
    };

    info!("Running LensGate gateway with options: {:?}", options);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the gateway: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
