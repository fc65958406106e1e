// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use storage_rbd::{CephTools, DriverConfig, SystemRunner, TracingSink, parse_location_url};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "storage-rbd-cli")]
#[command(about = "RBD driver operations backed by the ceph/rbd command line tools")]
struct Args {
    /// TOML driver config; overrides --pool, --conf and --id
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "rbd")]
    pool: String,

    /// Path to ceph.conf
    #[arg(long)]
    conf: Option<PathBuf>,

    /// Client identity
    #[arg(long)]
    id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split an rbd://fsid/pool/image/snapshot location
    ParseUrl { url: String },
    /// Print monitor hosts and ports as JSON
    MonAddrs,
    /// Import a local image file into the pool
    Import { base: PathBuf, name: String },
}

fn load_config(args: &Args) -> Result<DriverConfig> {
    if let Some(path) = &args.config {
        return DriverConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }

    let mut config = DriverConfig::new(args.pool.clone())?;
    if let Some(conf) = &args.conf {
        config = config.with_ceph_conf(conf.clone());
    }
    if let Some(id) = &args.id {
        config = config.with_rbd_user(id.clone());
    }
    Ok(config)
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storage_rbd=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::ParseUrl { url } = &args.command {
        let location = parse_location_url(url)?;
        println!(
            "fsid={} pool={} image={} snapshot={}",
            location.cluster_id, location.pool, location.image, location.snapshot
        );
        return Ok(());
    }

    let config = Arc::new(load_config(&args)?);
    let tools = CephTools::new(Arc::new(SystemRunner), config, Arc::new(TracingSink));

    match &args.command {
        Command::ParseUrl { .. } => {}
        Command::MonAddrs => {
            let addresses = tools.mon_addrs()?;
            println!("{}", serde_json::to_string_pretty(&addresses)?);
        }
        Command::Import { base, name } => {
            tools.import(base, name)?;
            tracing::info!("imported {} as {}", base.display(), name);
        }
    }

    Ok(())
}
