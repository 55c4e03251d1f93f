//! Disc image layer.
//!
//! An in-memory model of sessions, tracks, fragments and sectors, plus the
//! loaders and stream filters that populate it from image files. The command
//! engine only consumes the capability surface exposed here; it makes no
//! assumption about how a disc was materialized.

pub mod disc;
pub mod ecc;
pub mod filters;
pub mod iso;
pub mod msf;
pub mod sector;
pub mod stream;
pub mod writer;

use thiserror::Error;

pub use disc::{Disc, DpmTable, Fragment, Session, Track};
pub use sector::Sector;
pub use writer::ImageWriter;

/// Errors produced by the image layer
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Sector address {0} out of range")]
    SectorOutOfRange(i32),

    #[error("No such track")]
    NoSuchTrack,

    #[error("No such session")]
    NoSuchSession,

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed image: {0}")]
    Malformed(String),

    #[error("Invalid sector data: {0}")]
    InvalidSectorData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Medium type of a loaded or blank disc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumType {
    Cd,
    Dvd,
    Bd,
}

/// Sector type, matching the data layouts of ECMA-130 / CD-ROM XA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorType {
    Audio,
    Mode0,
    Mode1,
    Mode2,
    Mode2Form1,
    Mode2Form2,
    Mode2Mixed,
    /// Raw 2352-byte frame, type not yet determined
    Raw,
    /// Raw 2352-byte frame with the ECMA-130 scrambler still applied
    RawScrambled,
}

/// Subchannel data layout accepted or produced alongside main data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubchannelFormat {
    None,
    /// 16-byte cooked Q (12 significant bytes, zero-padded)
    Q,
    /// 96-byte cooked (de-interleaved) R-W
    Rw,
    /// 96-byte raw interleaved P-W
    Pw,
}

impl SubchannelFormat {
    /// Byte length of this layout
    pub fn len(&self) -> usize {
        match self {
            SubchannelFormat::None => 0,
            SubchannelFormat::Q => 16,
            SubchannelFormat::Rw | SubchannelFormat::Pw => 96,
        }
    }
}

/// Role of a fragment within a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentRole {
    Pregap,
    Data,
}

/// Session type reported in TOC and disc information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Cdda,
    Cdrom,
    Cdi,
    CdromXa,
}

impl SessionType {
    /// Disc-type byte used by READ TOC (A0 PSEC) and READ DISC INFORMATION
    pub fn disc_type_byte(&self) -> u8 {
        match self {
            SessionType::Cdda | SessionType::Cdrom => 0x00,
            SessionType::Cdi => 0x10,
            SessionType::CdromXa => 0x20,
        }
    }
}

bitflags::bitflags! {
    /// Sector fields a caller marks as present-but-disposable when feeding
    /// raw data; flagged fields are regenerated instead of being trusted
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IgnoreFields: u32 {
        const SYNC    = 1 << 0;
        const HEADER  = 1 << 1;
        const DATA    = 1 << 2;
        const EDC_ECC = 1 << 3;
    }
}
