//! consul-pager binary

use clap::Parser;
use pager_server::cli::{AddCheckArgs, Cli, Commands};
use pager_server::config::{CheckConfig, ConsulSettings};
use pager_server::{Config, ConsulClient, PagerServer, setup_tracing};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Start { config } => runtime.block_on(start(config)),
        Commands::AddCheck(args) => runtime.block_on(add_check(args)),
        Commands::Version => ExitCode::SUCCESS,
    }
}

async fn start(path: Option<PathBuf>) -> ExitCode {
    // Tracing is not up yet, report on stderr
    let config = match Config::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _telemetry_guard = match setup_tracing(
        &config.telemetry.service_name,
        &config.telemetry.otlp_endpoint,
        config.telemetry.enabled,
        &config.logging.level,
        config.logging.format,
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::warn!("Received signal, stopping pager watch");
        let _ = shutdown_tx.send(true);
    });

    match PagerServer::new(config).run(shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Error starting pager watcher, exiting");
            ExitCode::FAILURE
        }
    }
}

async fn add_check(args: AddCheckArgs) -> ExitCode {
    common::logging::init("info", common::LogFormat::Plain);

    let settings = ConsulSettings {
        address: args.consul,
        ..ConsulSettings::default()
    };
    let check = CheckConfig {
        name: args.name,
        interval: args.interval,
        script: args.script,
    };

    let result = match ConsulClient::new(&settings) {
        Ok(client) => client.register_check(&check).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Failed to register check {}: {e}", check.name);
            ExitCode::FAILURE
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
