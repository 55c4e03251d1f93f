//! ioctl definitions for the control device.
//!
//! The kernel module implements a single discovery ioctl that reports the
//! SCSI address assigned to the virtual host backing a control-device file.
//! The request code and semantics must stay in sync with the module.

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::ioctl_read_bad;

/// Discovery ioctl request code on the control device
pub const SCSI_ADDRESS_IOCTL: u32 = 0xBEEF001;

// The request code predates the _IOR encoding convention, hence the _bad
// variant
ioctl_read_bad!(scsi_address_ioctl, SCSI_ADDRESS_IOCTL, [i32; 4]);

/// SCSI address components reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiAddress {
    pub host: i32,
    pub channel: i32,
    pub target: i32,
    pub lun: i32,
}

impl ScsiAddress {
    /// Format as the sysfs device directory name `h:c:t:l`
    pub fn sysfs_name(&self) -> String {
        format!("{}:{}:{}:{}", self.host, self.channel, self.target, self.lun)
    }
}

/// Query the SCSI address of the virtual host behind `fd`.
///
/// Returns `Ok(None)` when the kernel reports `ENODEV`, which means the
/// virtual host has not been registered yet and the caller should try
/// again later.
pub fn query_scsi_address(fd: RawFd) -> nix::Result<Option<ScsiAddress>> {
    let mut id = [0i32; 4];

    match unsafe { scsi_address_ioctl(fd, &mut id) } {
        // The module reports ENODEV while the virtual host is still being
        // registered; either encoding means "try again later"
        Err(Errno::ENODEV) => Ok(None),
        Ok(ret) if ret == -(Errno::ENODEV as i32) => Ok(None),
        Err(e) => Err(e),
        Ok(_) => Ok(Some(ScsiAddress {
            host: id[0],
            channel: id[1],
            target: id[2],
            lun: id[3],
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysfs_name() {
        let addr = ScsiAddress { host: 26, channel: 0, target: 0, lun: 0 };
        assert_eq!(addr.sysfs_name(), "26:0:0:0");
    }

    #[test]
    fn test_query_on_bad_fd_is_error() {
        // -1 is never a valid descriptor; the ioctl must fail cleanly
        assert!(query_scsi_address(-1).is_err());
    }
}
