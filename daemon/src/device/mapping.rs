//! Host device mapping discovery.
//!
//! The kernel assigns a SCSI address to each virtual host; the matching
//! `/dev/srN` and `/dev/sgN` nodes are found by walking the sysfs device
//! directory. The discovery ioctl reports ENODEV until the host is
//! registered, in which case the caller retries later.

use std::os::unix::io::RawFd;
use std::path::Path;

use tracing::{debug, warn};

use opticd_common::ioctl::query_scsi_address;

use super::{Device, DeviceSignal};

impl Device {
    /// Attempt to resolve the sr/sg device mapping through the control
    /// device's discovery ioctl. Returns true when the caller should try
    /// again later.
    pub fn setup_mapping(&mut self, ctl_fd: RawFd) -> bool {
        match query_scsi_address(ctl_fd) {
            Ok(None) => {
                // Virtual host not registered yet
                return true;
            }
            Ok(Some(address)) => {
                let sysfs_path =
                    format!("/sys/bus/scsi/devices/{}", address.sysfs_name());
                match resolve_mapping(Path::new(&sysfs_path)) {
                    Some((sr, sg)) => {
                        debug!(
                            target: "opticd::device",
                            number = self.number(),
                            sr = %sr,
                            sg = %sg,
                            "device mapping resolved"
                        );
                        self.mapping = Some((sr, sg));
                    }
                    None => {
                        warn!(
                            target: "opticd::device",
                            number = self.number(),
                            path = %sysfs_path,
                            "device mapping could not be determined"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    target: "opticd::device",
                    number = self.number(),
                    error = %e,
                    "mapping ioctl failed; mapping info will not be available"
                );
            }
        }

        self.emit(DeviceSignal::MappingReady(self.number()));
        false
    }

    /// The resolved `(sr, sg)` device paths, when available
    pub fn get_mapping(&self) -> Option<(String, String)> {
        self.mapping.clone()
    }

    pub(crate) fn clear_mapping(&mut self) {
        self.mapping = None;
    }
}

/// Walk one sysfs SCSI device directory for its block and generic nodes
fn resolve_mapping(sysfs_dev: &Path) -> Option<(String, String)> {
    let entries = std::fs::read_dir(sysfs_dev).ok()?;

    let mut sr_name = None;
    let mut sg_name = None;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();

        if sr_name.is_none() {
            if let Some(sr) = name.strip_prefix("block:") {
                sr_name = Some(sr.to_string());
                continue;
            }
            if name.eq_ignore_ascii_case("block") {
                // Newer layout: block/ is a directory holding the node name
                if let Ok(mut dir) = std::fs::read_dir(entry.path()) {
                    if let Some(Ok(node)) = dir.next() {
                        sr_name = Some(node.file_name().to_string_lossy().into_owned());
                    }
                }
                continue;
            }
        }

        if sg_name.is_none() {
            if let Some(sg) = name.strip_prefix("scsi_generic:") {
                sg_name = Some(sg.to_string());
                continue;
            }
            if name.eq_ignore_ascii_case("generic") {
                // Symlink to the scsi_generic device
                if let Ok(target) = std::fs::read_link(entry.path()) {
                    if let Some(base) = target.file_name() {
                        sg_name = Some(base.to_string_lossy().into_owned());
                    }
                }
                continue;
            }
        }
    }

    Some((format!("/dev/{}", sr_name?), format!("/dev/{}", sg_name?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::test_device;

    #[test]
    fn test_resolve_mapping_prefixed_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("block:sr2")).unwrap();
        std::fs::create_dir(dir.path().join("scsi_generic:sg3")).unwrap();

        let (sr, sg) = resolve_mapping(dir.path()).unwrap();
        assert_eq!(sr, "/dev/sr2");
        assert_eq!(sg, "/dev/sg3");
    }

    #[test]
    fn test_resolve_mapping_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("block").join("sr0")).unwrap();
        std::fs::create_dir(dir.path().join("other")).unwrap();

        // No generic entry: mapping unavailable
        assert!(resolve_mapping(dir.path()).is_none());
    }

    #[test]
    fn test_mapping_ioctl_failure_emits_ready() {
        let mut dev = test_device();
        // Invalid fd: the ioctl fails, mapping stays empty, no retry
        assert!(!dev.setup_mapping(-1));
        assert!(dev.get_mapping().is_none());
    }
}
