//! Image loading.
//!
//! Opens an image file behind the filter chain (DMG, MacBinary/NDIF, or
//! plain) and builds a disc from the resulting byte stream: cooked
//! 2048-byte images become a single Mode 1 track, raw 2352-byte dumps keep
//! their frame layout with the type detected from the first sector.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::disc::{Disc, Fragment, FragmentData, Session, Track};
use super::filters;
use super::sector::Sector;
use super::stream::ImageStream;
use super::{FragmentRole, ImageError, MediumType, SectorType, SessionType, SubchannelFormat};

/// Largest sector count that still fits CD media (99 minutes)
const CD_MAX_SECTORS: u64 = 99 * 60 * 75;

/// Largest sector count that still fits single/dual-layer DVD media
const DVD_MAX_SECTORS: u64 = 2 * 2295104;

/// Load a disc image from the given file names. Multi-file loading only
/// supports the implicit segment chains resolved by the filters; `paths`
/// therefore carries the primary file first.
pub fn load_image(paths: &[PathBuf]) -> Result<Disc, ImageError> {
    let primary = paths.first().ok_or_else(|| {
        ImageError::UnsupportedFormat("no image filename given".to_string())
    })?;

    let mut stream = filters::open_chain(primary)?;
    let length = stream.length();
    debug!(target: "opticd::device", path = %primary.display(), length, "image stream opened");

    let (unit, total_sectors) = if length % 2048 == 0 {
        (2048usize, length / 2048)
    } else if length % 2352 == 0 {
        (2352usize, length / 2352)
    } else if length % 2448 == 0 {
        // Raw frames with appended 96-byte subchannel
        (2448usize, length / 2448)
    } else {
        return Err(ImageError::UnsupportedFormat(format!(
            "image size {length} does not align to a known sector layout"
        )));
    };

    if total_sectors == 0 {
        return Err(ImageError::UnsupportedFormat("image is empty".to_string()));
    }

    let (sector_type, medium_type) = match unit {
        2048 => {
            let medium = if total_sectors > DVD_MAX_SECTORS {
                MediumType::Bd
            } else if total_sectors > CD_MAX_SECTORS {
                MediumType::Dvd
            } else {
                MediumType::Cd
            };
            (SectorType::Mode1, medium)
        }
        _ => (detect_raw_track_type(stream.as_mut(), unit)?, MediumType::Cd),
    };

    let mut disc = Disc::new(medium_type);
    disc.set_filenames(paths.to_vec());
    if medium_type == MediumType::Cd {
        disc.set_layout_start_sector(-150);
    }

    let session_type = match sector_type {
        SectorType::Audio => SessionType::Cdda,
        SectorType::Mode2 | SectorType::Mode2Form1 | SectorType::Mode2Form2
        | SectorType::Mode2Mixed => SessionType::CdromXa,
        _ => SessionType::Cdrom,
    };
    let mut session = Session::new(session_type);

    let mut track = Track::new(sector_type);
    track.set_ctl(if sector_type == SectorType::Audio { 0x0 } else { 0x4 });

    if medium_type == MediumType::Cd {
        let mut pregap = Fragment::new(FragmentRole::Pregap, FragmentData::Empty);
        pregap.set_length(150);
        track.add_fragment(-1, pregap);
        track.set_track_start(150);
    }

    let mut data = Fragment::new(
        FragmentRole::Data,
        FragmentData::Stream {
            stream,
            offset: 0,
            unit: if unit == 2448 { 2352 } else { unit },
            sub_len: if unit == 2448 { 96 } else { 0 },
        },
    );
    data.set_length(total_sectors as i32);
    track.add_fragment(-1, data);

    session.add_track_by_index(track);
    disc.add_session(session);

    info!(
        target: "opticd::device",
        path = %primary.display(),
        sectors = total_sectors,
        medium = ?medium_type,
        "loaded disc image"
    );
    Ok(disc)
}

/// Inspect the first raw frame to determine the track's sector type
fn detect_raw_track_type(
    stream: &mut dyn ImageStream,
    unit: usize,
) -> Result<SectorType, ImageError> {
    let mut frame = vec![0u8; 2352.min(unit)];
    stream.read_exact_at(0, &mut frame)?;
    let sector =
        Sector::feed_data(0, SectorType::Raw, &frame, SubchannelFormat::None, &[], Default::default())?;
    Ok(match sector.sector_type() {
        // Collapse form variants: a raw track may interleave both forms
        SectorType::Mode2Form1 | SectorType::Mode2Form2 => SectorType::Mode2Mixed,
        other => other,
    })
}

/// Accepted image filename suffixes, used for option validation
pub fn is_supported_filename(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("iso" | "bin" | "img" | "dmg" | "macbin")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_cooked_iso() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.iso");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![0xAAu8; 2048 * 300]).unwrap();
        drop(file);

        let mut disc = load_image(&[path]).unwrap();
        assert_eq!(disc.medium_type(), MediumType::Cd);
        assert_eq!(disc.number_of_tracks(), 1);

        let track = disc.track_by_number(1).unwrap();
        assert_eq!(track.sector_type(), SectorType::Mode1);
        assert_eq!(track.length(), 450); // 150 pregap + 300 data
        assert_eq!(track.start_sector(), -150);

        let mut sector = disc.get_sector(0).unwrap();
        assert_eq!(sector.data(), &[0xAAu8; 2048][..]);
    }

    #[test]
    fn test_load_misaligned_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.iso");
        std::fs::write(&path, vec![0u8; 1000]).unwrap();
        assert!(load_image(&[path]).is_err());
    }

    #[test]
    fn test_supported_filenames() {
        assert!(is_supported_filename(Path::new("/a/b.iso")));
        assert!(is_supported_filename(Path::new("/a/b.DMG")));
        assert!(!is_supported_filename(Path::new("/a/b.txt")));
    }
}
