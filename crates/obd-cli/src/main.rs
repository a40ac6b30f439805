//! OBD-II Sensor Poller - Main Entry Point

use obd_cli::{init_logging, load_config, run};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(std::env::args().nth(1).as_deref())?;
    init_logging(&config.logging)?;

    info!("=== OBD Poll v{} ===", env!("CARGO_PKG_VERSION"));

    run(config).await
}
