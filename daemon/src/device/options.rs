//! Device options exposed through the management surface.
//!
//! Options transport `(name, value)` pairs; each name expects a specific
//! value shape. Unknown names are rejected, oversize identification
//! strings are clipped to their INQUIRY field widths.

use serde_json::{json, Value};
use tracing::debug;

use opticd_common::{DaemonError, OptionValue};

use super::{Device, DeviceId, DeviceSignal};

impl Device {
    /// Read an option value
    pub fn get_option(&self, name: &str) -> Result<OptionValue, DaemonError> {
        let value = match name {
            "dpm-emulation" => json!(self.options.dpm_emulation),
            "tr-emulation" => json!(self.options.tr_emulation),
            "bad-sector-emulation" => json!(self.options.bad_sector_emulation),
            "dvd-report-css" => json!(self.options.dvd_report_css),
            "device-id" => json!({
                "vendor": self.id.vendor,
                "product": self.id.product,
                "revision": self.id.revision,
                "vendor-specific": self.id.vendor_specific,
            }),
            "device-serial" => json!(self.serial),
            "daemon-debug-mask" => json!(self.daemon_debug_mask),
            "library-debug-mask" => json!(self.library_debug_mask),
            other => {
                return Err(DaemonError::InvalidArgument(format!("unknown option '{other}'")));
            }
        };
        Ok(value)
    }

    /// Change an option value
    pub fn set_option(&mut self, name: &str, value: OptionValue) -> Result<(), DaemonError> {
        match name {
            "dpm-emulation" => self.options.dpm_emulation = expect_bool(name, &value)?,
            "tr-emulation" => self.options.tr_emulation = expect_bool(name, &value)?,
            "bad-sector-emulation" => {
                self.options.bad_sector_emulation = expect_bool(name, &value)?;
            }
            "dvd-report-css" => self.options.dvd_report_css = expect_bool(name, &value)?,
            "device-id" => {
                let Value::Object(fields) = &value else {
                    return Err(DaemonError::InvalidArgument(
                        "device-id expects an object".to_string(),
                    ));
                };
                let field = |key: &str| {
                    fields.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
                };
                self.id = DeviceId::new(
                    &field("vendor"),
                    &field("product"),
                    &field("revision"),
                    &field("vendor-specific"),
                );
            }
            "device-serial" => {
                let Some(serial) = value.as_str() else {
                    return Err(DaemonError::InvalidArgument(
                        "device-serial expects a string".to_string(),
                    ));
                };
                self.serial = serial.to_string();
            }
            "daemon-debug-mask" => self.daemon_debug_mask = expect_u32(name, &value)?,
            "library-debug-mask" => self.library_debug_mask = expect_u32(name, &value)?,
            other => {
                return Err(DaemonError::InvalidArgument(format!("unknown option '{other}'")));
            }
        }

        debug!(target: "opticd::device", option = name, "option changed");
        self.emit(DeviceSignal::OptionChanged(self.number(), name.to_string()));
        Ok(())
    }
}

fn expect_bool(name: &str, value: &Value) -> Result<bool, DaemonError> {
    value
        .as_bool()
        .ok_or_else(|| DaemonError::InvalidArgument(format!("{name} expects a boolean")))
}

fn expect_u32(name: &str, value: &Value) -> Result<u32, DaemonError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| DaemonError::InvalidArgument(format!("{name} expects a 32-bit integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::test_device;

    #[test]
    fn test_bool_options_roundtrip() {
        let mut dev = test_device();

        assert_eq!(dev.get_option("dpm-emulation").unwrap(), json!(false));
        dev.set_option("dpm-emulation", json!(true)).unwrap();
        assert_eq!(dev.get_option("dpm-emulation").unwrap(), json!(true));
        assert!(dev.options.dpm_emulation);

        assert!(dev.set_option("dpm-emulation", json!("yes")).is_err());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let mut dev = test_device();
        assert!(matches!(
            dev.get_option("warp-drive"),
            Err(DaemonError::InvalidArgument(_))
        ));
        assert!(dev.set_option("warp-drive", json!(true)).is_err());
    }

    #[test]
    fn test_device_id_clips_width() {
        let mut dev = test_device();
        dev.set_option(
            "device-id",
            json!({
                "vendor": "AVENDORNAMETHATISTOOLONG",
                "product": "PRODUCT",
                "revision": "9.99.99",
                "vendor-specific": "",
            }),
        )
        .unwrap();

        assert_eq!(dev.id.vendor.len(), 8);
        assert_eq!(dev.id.revision, "9.99");
        assert_eq!(dev.id.product, "PRODUCT");
    }

    #[test]
    fn test_debug_masks() {
        let mut dev = test_device();
        dev.set_option("daemon-debug-mask", json!(0x3Fu32)).unwrap();
        assert_eq!(dev.daemon_debug_mask, 0x3F);
        assert!(dev.set_option("daemon-debug-mask", json!(-1)).is_err());
    }
}
