use anyhow::Context;
use clap::{Arg, Command};
use meshforge::api::{self, AppState};
use meshforge::deploy::Deployer;
use meshforge::registry::TargetRegistry;
use meshforge::scripts::ScriptBuilder;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let matches = Command::new("meshforge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("SSH deployment orchestrator for meshforge mesh-VPN nodes")
        .subcommand(
            Command::new("serve").about("Run the orchestrator HTTP API").arg(
                Arg::new("port")
                    .long("port")
                    .value_name("PORT")
                    .help("Listen port (overrides the PORT env var)"),
            ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("serve", sub)) => run_serve(sub.get_one::<String>("port").cloned()).await,
        // Bare `meshforge` serves with defaults
        _ => run_serve(None).await,
    };

    if let Err(e) = result {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run_serve(port_arg: Option<String>) -> anyhow::Result<()> {
    let port: u16 = match port_arg.or_else(|| std::env::var("PORT").ok()) {
        Some(p) => p.parse().context("Invalid port")?,
        None => 3017,
    };

    let data_dir = std::env::var("MESHFORGE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".meshforge")
        });
    let source_dir = std::env::var("MESHFORGE_SOURCE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let apt_noninteractive = !matches!(
        std::env::var("MESHFORGE_NONINTERACTIVE").as_deref(),
        Ok("0") | Ok("false")
    );

    let registry = Arc::new(TargetRegistry::open(&data_dir)?);
    let deployer = Arc::new(Deployer::new(
        registry.clone(),
        ScriptBuilder::new(apt_noninteractive),
        source_dir.clone(),
    ));

    println!("⚙️  Target registry: {}", data_dir.join("targets.json").display());
    println!("📦 Source tree: {}", source_dir.display());

    api::serve(AppState { registry, deployer }, port).await
}
