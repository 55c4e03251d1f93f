//! Disc load, blank disc creation and unload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use opticd_common::DaemonError;

use super::features::Profile;
use super::recording::set_recording_mode;
use super::{Device, DeviceSignal, MediaEvent};
use crate::image::{iso, Disc, ImageWriter, MediumType};

/// CD-R blank media lead-in start
const CD_LEADIN_START: i32 = -11077;

impl Device {
    /// Load a disc image. The caller holds the device lock.
    pub fn load_disc(
        &mut self,
        filenames: &[PathBuf],
        _options: &HashMap<String, Value>,
    ) -> Result<(), DaemonError> {
        if self.loaded() {
            debug!(target: "opticd::device", "device already loaded");
            return Err(DaemonError::AlreadyLoaded);
        }

        let disc =
            iso::load_image(filenames).map_err(|e| DaemonError::Image(e.to_string()))?;

        let profile = match disc.medium_type() {
            MediumType::Cd => Profile::CdRom,
            MediumType::Dvd => Profile::DvdRom,
            MediumType::Bd => Profile::BdRom,
        };

        self.disc = Some(disc);
        self.recordable_disc = false;
        self.rewritable_disc = false;
        self.set_profile(profile);

        self.media_event = MediaEvent::NewMedia;
        self.emit_status_changed();

        info!(target: "opticd::device", number = self.number(), "disc loaded");
        Ok(())
    }

    /// Create a blank recordable disc. Options carry the writer id, the
    /// medium type and `writer.*` parameters.
    pub fn create_blank_disc(
        &mut self,
        filename: &Path,
        options: &HashMap<String, Value>,
    ) -> Result<(), DaemonError> {
        if self.loaded() {
            debug!(target: "opticd::device", "device already loaded");
            return Err(DaemonError::AlreadyLoaded);
        }

        let mut writer_id = None;
        let mut medium_type = MediumType::Cd;
        let mut medium_capacity = 80 * 60 * 75; // 80-minute CD-R
        let mut writer_parameters = HashMap::new();

        for (key, value) in options {
            if key.eq_ignore_ascii_case("writer-id") {
                writer_id = value.as_str().map(str::to_string);
            } else if key.eq_ignore_ascii_case("medium-type") {
                let medium = value.as_str().unwrap_or_default();
                (medium_type, medium_capacity) = match medium.to_ascii_lowercase().as_str() {
                    "cdr74" => (MediumType::Cd, 74 * 60 * 75),
                    "cdr80" => (MediumType::Cd, 80 * 60 * 75),
                    "cdr90" => (MediumType::Cd, 90 * 60 * 75),
                    "cdr99" => (MediumType::Cd, 99 * 60 * 75),
                    "dvd+r" => (MediumType::Dvd, 2295104),
                    "bd-r" => (MediumType::Bd, 12219392),
                    other => {
                        return Err(DaemonError::InvalidArgument(format!(
                            "invalid medium type '{other}'"
                        )));
                    }
                };
            } else if let Some(param) = key.strip_prefix("writer.") {
                if let Some(value) = value.as_str() {
                    writer_parameters.insert(param.to_string(), value.to_string());
                }
            }
        }

        let Some(writer_id) = writer_id else {
            warn!(target: "opticd::device", "no image writer id provided");
            return Err(DaemonError::Daemon("no image writer id provided".to_string()));
        };

        let mut writer = ImageWriter::create(&writer_id, filename)
            .map_err(|e| DaemonError::InvalidArgument(e.to_string()))?;

        let mut disc = Disc::new(medium_type);
        disc.set_filename(filename);

        self.recordable_disc = true;
        self.rewritable_disc = false;
        self.medium_capacity = medium_capacity;

        if medium_type == MediumType::Cd {
            self.medium_leadin = CD_LEADIN_START;
            disc.set_layout_start_sector(-150);
        } else {
            self.medium_leadin = 0;
            disc.set_layout_start_sector(0);
        }

        writer
            .open_image(&mut disc, writer_parameters)
            .map_err(|e| DaemonError::Image(e.to_string()))?;

        self.disc = Some(disc);
        self.writer = Some(writer);
        self.num_written_sectors = 0;
        self.open_session = None;
        self.open_track = None;
        self.disc_closed = false;

        let profile = match medium_type {
            MediumType::Cd => Profile::CdR,
            MediumType::Dvd => Profile::DvdPlusR,
            MediumType::Bd => Profile::BdRSrm,
        };
        self.set_profile(profile);

        // Default recording mode: track-at-once
        set_recording_mode(self, 1);

        self.media_event = MediaEvent::NewMedia;
        self.emit_status_changed();

        info!(target: "opticd::device", number = self.number(), "blank disc created");
        Ok(())
    }

    /// Unload the disc. The eject request is reported through the media
    /// event even when the lock prevents the eject itself.
    pub fn unload_disc_locked(&mut self, force: bool) -> Result<(), DaemonError> {
        // Report the eject attempt regardless; it hints the desktop layer
        // to unlock the device
        self.media_event = MediaEvent::EjectRequest;

        if !force && self.locked {
            debug!(target: "opticd::device", "device is locked");
            return Err(DaemonError::DeviceLocked);
        }

        if self.loaded() {
            self.disc = None;
            self.media_event = MediaEvent::MediaRemoval;

            // Clear recording state
            self.open_track = None;
            self.open_session = None;
            self.writer = None;
            self.recording = None;
            self.cue_sheet = None;
            self.cue_entry_tno = None;
            self.sao_leadin_format = 0;
            self.leadin_cdtext_packs.clear();
            self.disc_closed = false;
            self.recordable_disc = false;
            self.rewritable_disc = false;
            self.num_written_sectors = 0;

            self.set_profile(Profile::None);
            self.emit_status_changed();

            info!(target: "opticd::device", number = self.number(), "disc unloaded");
        }

        Ok(())
    }

    /// Management-level unload. A locked device still reports success:
    /// the eject request was raised and the desktop layer will unlock and
    /// retry.
    pub fn unload_disc(&mut self) -> Result<(), DaemonError> {
        match self.unload_disc_locked(false) {
            Ok(()) => Ok(()),
            Err(DaemonError::DeviceLocked) => {
                debug!(target: "opticd::device", "unload blocked by lock, reporting success");
                self.emit(DeviceSignal::StatusChanged(self.number()));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::test_device;
    use std::io::Write;

    fn write_iso(dir: &tempfile::TempDir, sectors: usize) -> PathBuf {
        let path = dir.path().join("disc.iso");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![0u8; sectors * 2048]).unwrap();
        path
    }

    #[test]
    fn test_load_and_unload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_iso(&dir, 300);

        let mut dev = test_device();
        dev.load_disc(&[path.clone()], &HashMap::new()).unwrap();
        assert!(dev.loaded());
        assert_eq!(dev.features.current_profile(), Profile::CdRom);
        assert_eq!(dev.media_event, MediaEvent::NewMedia);

        // Double load is refused
        assert!(matches!(
            dev.load_disc(&[path], &HashMap::new()),
            Err(DaemonError::AlreadyLoaded)
        ));

        dev.unload_disc_locked(false).unwrap();
        assert!(!dev.loaded());
        assert_eq!(dev.features.current_profile(), Profile::None);
        assert_eq!(dev.media_event, MediaEvent::MediaRemoval);
    }

    #[test]
    fn test_locked_device_refuses_unload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_iso(&dir, 10);

        let mut dev = test_device();
        dev.load_disc(&[path], &HashMap::new()).unwrap();
        dev.locked = true;

        assert!(matches!(dev.unload_disc_locked(false), Err(DaemonError::DeviceLocked)));
        // The eject request is reported regardless
        assert_eq!(dev.media_event, MediaEvent::EjectRequest);
        assert!(dev.loaded());

        // Forced unload wins
        dev.unload_disc_locked(true).unwrap();
        assert!(!dev.loaded());
    }

    #[test]
    fn test_create_blank_cd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.iso");

        let mut dev = test_device();
        let mut options = HashMap::new();
        options.insert("writer-id".to_string(), Value::from("writer-raw"));
        options.insert("medium-type".to_string(), Value::from("cdr80"));

        dev.create_blank_disc(&path, &options).unwrap();
        assert!(dev.loaded());
        assert!(dev.recordable_disc);
        assert_eq!(dev.medium_capacity, 80 * 60 * 75);
        assert_eq!(dev.medium_leadin, CD_LEADIN_START);
        assert_eq!(dev.features.current_profile(), Profile::CdR);
        assert!(dev.recording.is_some());
    }

    #[test]
    fn test_create_blank_requires_writer_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.iso");

        let mut dev = test_device();
        assert!(matches!(
            dev.create_blank_disc(&path, &HashMap::new()),
            Err(DaemonError::Daemon(_))
        ));
    }

    #[test]
    fn test_create_blank_rejects_bad_medium() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.iso");

        let mut dev = test_device();
        let mut options = HashMap::new();
        options.insert("writer-id".to_string(), Value::from("writer-raw"));
        options.insert("medium-type".to_string(), Value::from("floppy"));
        assert!(matches!(
            dev.create_blank_disc(&path, &options),
            Err(DaemonError::InvalidArgument(_))
        ));
    }
}
