//! Image writer used by the recording engine.
//!
//! Recorded sectors accumulate inside in-memory fragments; `finalize_image`
//! dumps the assembled tracks into the target file. Mode 1 tracks are
//! written cooked (2048 bytes per sector), everything else as raw frames.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::disc::{Disc, Fragment, FragmentData};
use super::{FragmentRole, ImageError, SectorType};

/// Writer bound to a target image file
#[derive(Debug)]
pub struct ImageWriter {
    filename: PathBuf,
    parameters: HashMap<String, String>,
}

impl ImageWriter {
    /// Create a writer for the given writer id; only the built-in raw
    /// writer is available
    pub fn create(writer_id: &str, filename: &Path) -> Result<Self, ImageError> {
        if writer_id != "writer-raw" {
            return Err(ImageError::UnsupportedFormat(format!(
                "unknown image writer '{writer_id}'"
            )));
        }
        Ok(Self { filename: filename.to_path_buf(), parameters: HashMap::new() })
    }

    /// Prepare the writer for a blank disc
    pub fn open_image(
        &mut self,
        disc: &mut Disc,
        parameters: HashMap<String, String>,
    ) -> Result<(), ImageError> {
        self.parameters = parameters;
        disc.set_filename(&self.filename);
        debug!(target: "opticd::recording", path = %self.filename.display(), "image writer opened");
        Ok(())
    }

    /// Create an unattached fragment for a track being recorded
    pub fn create_fragment(&self, role: FragmentRole) -> Fragment {
        Fragment::new(role, FragmentData::Sectors(Vec::new()))
    }

    /// Write the assembled disc out to the target file
    pub fn finalize_image(&mut self, disc: &mut Disc) -> Result<(), ImageError> {
        let mut file = File::create(&self.filename)?;
        let mut written_sectors = 0usize;

        for sidx in 0..disc.number_of_sessions() {
            let track_spans: Vec<(i32, i32, SectorType)> = disc
                .session(sidx)
                .map(|session| {
                    session
                        .tracks()
                        .iter()
                        .map(|t| (t.start_sector(), t.length(), t.sector_type()))
                        .collect()
                })
                .unwrap_or_default();

            for (start, length, sector_type) in track_spans {
                for address in start..start + length {
                    let mut sector = disc.get_sector(address)?;
                    if sector_type == SectorType::Mode1 {
                        file.write_all(sector.data())?;
                    } else {
                        file.write_all(sector.raw_frame())?;
                    }
                    written_sectors += 1;
                }
            }
        }

        file.flush()?;
        info!(
            target: "opticd::recording",
            path = %self.filename.display(),
            sectors = written_sectors,
            "finalized image"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::disc::{Session, Track};
    use crate::image::sector::Sector;
    use crate::image::{MediumType, SessionType, SubchannelFormat};

    #[test]
    fn test_unknown_writer_rejected() {
        assert!(ImageWriter::create("writer-xyz", Path::new("/tmp/out.iso")).is_err());
    }

    #[test]
    fn test_finalize_writes_cooked_mode1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.iso");
        let mut writer = ImageWriter::create("writer-raw", &path).unwrap();

        let mut disc = Disc::new(MediumType::Cd);
        writer.open_image(&mut disc, HashMap::new()).unwrap();

        let mut session = Session::new(SessionType::Cdrom);
        let mut track = Track::new(SectorType::Mode1);
        track.add_fragment(-1, writer.create_fragment(FragmentRole::Data));
        session.add_track_by_index(track);
        disc.add_session(session);

        for address in 0..4 {
            let sector = Sector::feed_data(
                address,
                SectorType::Mode1,
                &vec![address as u8; 2048],
                SubchannelFormat::None,
                &[],
                Default::default(),
            )
            .unwrap();
            disc.put_sector(0, 0, sector).unwrap();
        }

        writer.finalize_image(&mut disc).unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 4 * 2048);
        assert!(written[..2048].iter().all(|&b| b == 0));
        assert!(written[2048..4096].iter().all(|&b| b == 1));
    }
}
