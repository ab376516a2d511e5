//! Demo 9P2000 server: builds a nested VFS from a TOML mount table and
//! serves it over TCP.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ninefs::config::{Config, MountKind};
use ninefs::dbfs::DbFs;
use ninefs::localfs::LocalFs;
use ninefs::nestedfs::NestedFs;
use ninefs::nine;
use ninefs::store::MemoryStore;
use ninefs::vfs::Vfs;

#[derive(Parser)]
#[command(about = "Serve a virtual file system over 9P2000")]
struct Args {
    /// Path to the TOML configuration file.
    config: PathBuf,
    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let listen = args.listen.unwrap_or_else(|| config.listen.clone());

    let nested = NestedFs::new();
    for mount in &config.mounts {
        let backend: Arc<dyn Vfs> = match mount.kind {
            MountKind::Memory => Arc::new(
                DbFs::open(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())).await?,
            ),
            MountKind::Local => {
                let root = mount
                    .root
                    .clone()
                    .ok_or_else(|| format!("mount {} needs a root directory", mount.prefix))?;
                Arc::new(LocalFs::new(root))
            }
        };
        nested.mount(&mount.prefix, backend).await?;
        info!(prefix = %mount.prefix, kind = ?mount.kind, "mounted");
    }

    let listener = TcpListener::bind(&listen).await?;
    info!(%listen, "serving 9P2000");
    nine::serve(listener, Arc::new(nested)).await?;
    Ok(())
}
