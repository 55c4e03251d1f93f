//! opticd daemon entry point.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use opticd::daemon::Daemon;
use opticd_common::DaemonConfig;

/// Map the numeric daemon debug mask onto tracing filter directives
fn filter_from_masks(config: &DaemonConfig) -> EnvFilter {
    // An explicit RUST_LOG wins over the configured masks
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let mask = config.debug.daemon_mask;
    let mut directives = vec!["info".to_string()];
    for (bit, target) in [
        (0x01u32, "opticd::device"),
        (0x02, "opticd::mmc"),
        (0x04, "opticd::delay"),
        (0x08, "opticd::audioplay"),
        (0x10, "opticd::kernel_io"),
        (0x20, "opticd::recording"),
    ] {
        if mask & bit != 0 {
            directives.push(format!("{target}=debug"));
        }
    }

    EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn main() -> Result<()> {
    // Single optional argument: an alternative configuration file
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);

    let config = DaemonConfig::load(config_path.as_deref())
        .context("failed to load configuration")?;

    tracing_subscriber::fmt().with_env_filter(filter_from_masks(&config)).init();

    info!(
        devices = config.general.num_devices,
        ctl_device = %config.general.ctl_device,
        "starting opticd"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let mut daemon = Daemon::new(&config);
    runtime.block_on(daemon.run())
}
