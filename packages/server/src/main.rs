//! The steward daemon: boots the Core, serves both RPC planes, and
//! waits for a termination signal.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use steward_server::config::{self, defaults, CoreConfig};
use steward_server::{lifecycle, Core};

#[derive(Debug, Parser)]
#[command(name = "steward", about = "Microservice control plane core", version)]
struct Args {
    /// JSON manifest of managed services to launch at boot.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data-plane bind address.
    #[arg(long, default_value = defaults::DATA_ADDRESS)]
    data_address: String,

    /// Control-plane bind address.
    #[arg(long, default_value = defaults::CONTROL_ADDRESS)]
    control_address: String,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "steward_server=debug,steward_core=debug"
    } else {
        "steward_server=info,steward_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut core_config = CoreConfig::default().with_environment();
    core_config.data_address = args.data_address;
    core_config.control_address = args.control_address;
    if let Some(path) = &args.config {
        core_config.services = config::load_manifest(path)
            .with_context(|| format!("could not load manifest {}", path.display()))?;
    }

    let env = core_config.env;
    let core = Core::initialize(core_config);

    let (data_addr, control_addr) = steward_server::rpc::serve(&core)
        .await
        .context("could not bind rpc endpoints")?;
    core.boot_services();

    info!(
        %data_addr,
        %control_addr,
        env = env.as_str(),
        services = core.config().services.len(),
        "steward core up"
    );

    let mut stopped = core.lifecycle().subscribe();
    tokio::select! {
        installed = lifecycle::wait_for_signal(env) => {
            installed.context("could not install signal handlers")?;
            core.shutdown(false, "signal").await;
        }
        // Operator-initiated: the shutdown procedure already ran.
        _ = stopped.changed() => {}
    }

    Ok(())
}
