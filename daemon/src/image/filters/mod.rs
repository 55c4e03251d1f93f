//! Stream filters for compressed and wrapped image files.
//!
//! Each filter probes the file's signature and, when it matches, exposes
//! the decoded payload as a plain `ImageStream`. `open_chain` runs the
//! probes in order and falls back to the raw file.

pub mod adc;
pub mod dmg;
pub mod macbinary;
pub mod rsrc_fork;

use std::path::Path;

use crate::image::stream::{FileStream, ImageStream};
use crate::image::ImageError;

/// Open an image file behind the appropriate filter
pub fn open_chain(path: &Path) -> Result<Box<dyn ImageStream>, ImageError> {
    if let Some(stream) = dmg::DmgStream::open(path)? {
        return Ok(Box::new(stream));
    }
    if let Some(stream) = macbinary::MacBinaryStream::open(path)? {
        return Ok(Box::new(stream));
    }
    Ok(Box::new(FileStream::open(path)?))
}
