//! opticd: user-space SCSI/ATAPI optical drive emulation.
//!
//! The daemon pairs with a kernel module that publishes virtual SCSI hosts
//! and forwards packet commands over a character control device. Each
//! emulated device owns an I/O thread that reads requests, interprets the
//! MMC command set against a loaded disc image, and writes responses back.

pub mod daemon;
pub mod device;
pub mod image;
