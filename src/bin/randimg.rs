//! randimg CLI - fetch and show one random image, or run the caching proxy.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use randimg::{
    AppConfig, FileKeyValueStore, HostSignal, PageSession, ReqwestFetcher,
    ServiceWorkerContainer, SnapshotStore, TerminalRegion,
};

fn print_usage() {
    eprintln!("Usage: randimg [MODE] [OPTIONS]");
    eprintln!();
    eprintln!("Modes:");
    eprintln!("  (default)           Fetch one random image and print it");
    eprintln!("  --serve             Run the offline caching proxy in front of the app origin");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <PATH>     Read configuration from PATH instead of the default location");
    eprintln!("  -h, --help          Show this help");
    eprintln!();
    eprintln!("Logging is controlled with RUST_LOG (default: warn).");
}

async fn show_one(config: AppConfig) -> randimg::Result<()> {
    let snapshots = SnapshotStore::new(
        Arc::new(FileKeyValueStore::new(&config.paths.state_dir)),
        config.page.snapshot_key.clone(),
    );
    let registrar = Arc::new(ServiceWorkerContainer::new(&config.page.origin)?);
    let session = PageSession::start(
        config.page,
        Arc::new(ReqwestFetcher::new()?),
        snapshots,
        Arc::new(TerminalRegion),
        registrar,
    );

    session.dispatch(HostSignal::ContentLoaded).await;
    session.dispatch(HostSignal::Load).await;
    Ok(())
}

#[tokio::main]
async fn main() -> randimg::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut serve = false;
    let mut config_path: Option<PathBuf> = None;

    let args: Vec<String> = env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--serve" => serve = true,
            "--config" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    eprintln!("Error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Error: unknown argument {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => {
            log::info!("Loading config from {}", path.display());
            AppConfig::load_from(path)?
        }
        None => AppConfig::load()?,
    };

    if serve {
        #[cfg(feature = "server")]
        {
            randimg::server::run(config).await
        }
        #[cfg(not(feature = "server"))]
        {
            let _ = config;
            eprintln!("Proxy support not compiled in");
            std::process::exit(1);
        }
    } else {
        show_one(config).await
    }
}
