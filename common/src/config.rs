//! Configuration for the daemon.
//!
//! Daemon-wide settings and per-device defaults live in a TOML file,
//! either named explicitly on the command line or resolved from
//! XDG_CONFIG_HOME. An explicit path must exist and parse; a missing file
//! at the default location simply yields the built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::DaemonError;

/// Main configuration structure containing all persistent settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// General daemon settings
    pub general: GeneralConfig,
    /// Default identification presented by every device
    pub identity: IdentityConfig,
    /// Default emulation options applied to every device
    pub options: OptionsConfig,
    /// Debug mask settings
    pub debug: DebugConfig,
}

/// General daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Number of virtual devices to create at startup
    pub num_devices: usize,
    /// Control device path; "%d" is replaced by the device number when the
    /// kernel module exposes one control node per host
    pub ctl_device: String,
    /// Audio backend name handed to the audio subsystem ("null" disables
    /// actual playback)
    pub audio_driver: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            ctl_device: "/dev/vhba_ctl".to_string(),
            audio_driver: "null".to_string(),
        }
    }
}

/// INQUIRY identification strings. Oversize values are clipped to their
/// fixed INQUIRY field widths when applied to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Vendor ID (8 characters)
    pub vendor: String,
    /// Product ID (16 characters)
    pub product: String,
    /// Product revision (4 characters)
    pub revision: String,
    /// Vendor-specific field (20 characters)
    pub vendor_specific: String,
    /// Unit serial number reported through VPD page 0x80
    pub serial: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            vendor: "OPTICD  ".to_string(),
            product: "VIRTUALCD       ".to_string(),
            revision: "1.10".to_string(),
            vendor_specific: String::new(),
            serial: "0123456789AB".to_string(),
        }
    }
}

/// Emulation options; each maps to a `set_option` name (see device options)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OptionsConfig {
    /// Emulate DPM-derived seek delays
    pub dpm_emulation: bool,
    /// Emulate transfer delays
    pub tr_emulation: bool,
    /// Report UNRECOVERED READ ERROR on sectors with bad LEC
    pub bad_sector_emulation: bool,
    /// Report CSS protection in the DVD copyright structure
    pub dvd_report_css: bool,
}

/// Debug mask settings (translated into tracing filter directives)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DebugConfig {
    /// Daemon-side debug mask
    pub daemon_mask: u32,
    /// Image-library debug mask
    pub library_mask: u32,
}

impl DaemonConfig {
    /// Default configuration file location under XDG_CONFIG_HOME
    fn default_path() -> PathBuf {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("opticd")
            .join("config.toml")
    }

    /// Resolve and load the configuration. `path` is the command-line
    /// override: it must exist and parse. Without one, a missing file at
    /// the default location yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, DaemonError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if required {
                return Err(DaemonError::InvalidArgument(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Write the configuration, creating the parent directory as needed
    pub fn save(&self, path: &Path) -> Result<(), DaemonError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DaemonConfig::default();
        config.general.num_devices = 2;
        config.options.dpm_emulation = true;
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.general.num_devices, 2);
        assert!(loaded.options.dpm_emulation);
        assert_eq!(loaded.identity.vendor, config.identity.vendor);
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let result = DaemonConfig::load(Some(Path::new("/nonexistent/opticd.toml")));
        assert!(matches!(result, Err(DaemonError::InvalidArgument(_))));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[general]\nnum_devices = 4\n").unwrap();

        let loaded = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.general.num_devices, 4);
        assert_eq!(loaded.general.ctl_device, "/dev/vhba_ctl");
        assert_eq!(loaded.identity.revision, "1.10");
    }

    #[test]
    fn test_malformed_config_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "general = { num_devices = }").unwrap();

        let result = DaemonConfig::load(Some(&path));
        assert!(matches!(result, Err(DaemonError::ConfigParse(_))));
    }
}
