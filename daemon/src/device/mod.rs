//! Emulated optical drive device.
//!
//! A `Device` aggregates the full per-drive state: the loaded disc, the
//! mode-page and feature stores, recording state, delay model, identity and
//! options. Commands run against it with the surrounding mutex held; the
//! kernel I/O thread and the management surface share it through
//! `Arc<Mutex<Device>>`.

pub mod audio;
pub mod commands;
pub mod delay;
pub mod disc_structures;
pub mod features;
pub mod kernel_io;
pub mod load;
pub mod mapping;
pub mod mode_pages;
pub mod options;
pub mod recording;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::image::{Disc, ImageWriter, Session};
use audio::AudioPort;
use delay::DelayEmulator;
use features::FeatureStore;
use mode_pages::ModePageStore;
use recording::RecordingStrategy;

/// Media event reported through GET EVENT/STATUS NOTIFICATION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaEvent {
    #[default]
    NoChange = 0,
    EjectRequest = 1,
    NewMedia = 2,
    MediaRemoval = 3,
}

/// Cross-thread notifications raised by a device
#[derive(Debug, Clone)]
pub enum DeviceSignal {
    /// Load/unload or recording finalization changed the device status
    StatusChanged(u32),
    /// An option value changed
    OptionChanged(u32, String),
    /// The sr/sg mapping became available
    MappingReady(u32),
    /// Scheduled retry of the mapping discovery ioctl
    MappingRetry(u32),
    /// Fatal control-device I/O failure; the owner must restart the device
    KernelIoError(u32),
}

/// INQUIRY identity strings, clipped to their fixed field widths
#[derive(Debug, Clone)]
pub struct DeviceId {
    pub vendor: String,
    pub product: String,
    pub revision: String,
    pub vendor_specific: String,
}

impl DeviceId {
    /// Field widths: vendor 8, product 16, revision 4, vendor-specific 20
    pub fn new(vendor: &str, product: &str, revision: &str, vendor_specific: &str) -> Self {
        Self {
            vendor: clip(vendor, 8),
            product: clip(product, 16),
            revision: clip(revision, 4),
            vendor_specific: clip(vendor_specific, 20),
        }
    }
}

fn clip(value: &str, width: usize) -> String {
    value.chars().take(width).collect()
}

/// Emulation options toggled through the management surface
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceOptions {
    pub dpm_emulation: bool,
    pub tr_emulation: bool,
    pub bad_sector_emulation: bool,
    pub dvd_report_css: bool,
}

/// Full state of one emulated drive
pub struct Device {
    number: u32,

    // Medium
    pub(crate) disc: Option<Disc>,
    pub(crate) media_event: MediaEvent,
    pub(crate) locked: bool,
    pub(crate) current_address: i32,

    // MMC state
    pub(crate) mode_pages: ModePageStore,
    pub(crate) features: FeatureStore,
    pub(crate) delay: DelayEmulator,

    // Identity
    pub(crate) id: DeviceId,
    pub(crate) serial: String,

    // Options
    pub(crate) options: DeviceOptions,
    pub(crate) daemon_debug_mask: u32,
    pub(crate) library_debug_mask: u32,

    // Recording
    pub(crate) recording: Option<&'static dyn RecordingStrategy>,
    pub(crate) writer: Option<ImageWriter>,
    pub(crate) open_session: Option<usize>,
    pub(crate) open_track: Option<(usize, usize)>,
    pub(crate) cue_sheet: Option<Session>,
    pub(crate) cue_entry_tno: Option<i32>,
    pub(crate) sao_leadin_format: u8,
    pub(crate) leadin_cdtext_packs: Vec<[u8; 18]>,
    pub(crate) last_recorded_tno: u8,
    pub(crate) last_recorded_idx: u8,
    pub(crate) num_written_sectors: i32,
    pub(crate) medium_leadin: i32,
    pub(crate) medium_capacity: i32,
    pub(crate) disc_closed: bool,
    pub(crate) recordable_disc: bool,
    pub(crate) rewritable_disc: bool,

    // Data cache between the kernel buffers and the handlers
    pub(crate) cache: Vec<u8>,
    pub(crate) cache_size: usize,

    // Collaborators
    pub(crate) audio: Box<dyn AudioPort>,
    pub(crate) signals: UnboundedSender<DeviceSignal>,
    pub(crate) mapping: Option<(String, String)>,
}

impl Device {
    /// One-time setup: install mode pages and features, create the audio
    /// port, allocate the data cache
    pub fn initialize(
        number: u32,
        audio_driver: &str,
        id: DeviceId,
        serial: String,
        options: DeviceOptions,
        daemon_debug_mask: u32,
        library_debug_mask: u32,
        signals: UnboundedSender<DeviceSignal>,
    ) -> Self {
        debug!(target: "opticd::device", number, "initializing device");

        let mut device = Self {
            number,
            disc: None,
            media_event: MediaEvent::NoChange,
            locked: false,
            current_address: 0,
            mode_pages: ModePageStore::new(),
            features: FeatureStore::new(),
            delay: DelayEmulator::new(),
            id,
            serial,
            options,
            daemon_debug_mask,
            library_debug_mask,
            recording: None,
            writer: None,
            open_session: None,
            open_track: None,
            cue_sheet: None,
            cue_entry_tno: None,
            sao_leadin_format: 0,
            leadin_cdtext_packs: Vec::new(),
            last_recorded_tno: 0,
            last_recorded_idx: 0,
            num_written_sectors: 0,
            medium_leadin: 0,
            medium_capacity: 0,
            disc_closed: false,
            recordable_disc: false,
            rewritable_disc: false,
            cache: vec![0u8; opticd_common::proto::KERNEL_IO_BUFFER_SIZE],
            cache_size: 0,
            audio: audio::create_audio_port(audio_driver),
            signals,
            mapping: None,
        };

        // No medium: profile NONE, empty feature set current
        let mut mode_pages = std::mem::take(&mut device.mode_pages);
        device.features.set_profile(features::Profile::None, None, &mut mode_pages);
        device.mode_pages = mode_pages;

        device
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Whether a medium is loaded
    pub fn loaded(&self) -> bool {
        self.disc.is_some()
    }

    /// Loaded image filenames, for the management status call
    pub fn filenames(&self) -> Vec<String> {
        self.disc
            .as_ref()
            .map(|d| {
                d.filenames()
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn emit(&self, signal: DeviceSignal) {
        // The receiver disappearing just means nobody is listening anymore
        let _ = self.signals.send(signal);
    }

    pub(crate) fn emit_status_changed(&self) {
        self.emit(DeviceSignal::StatusChanged(self.number));
    }

    /// Advertised end sector for write-speed descriptors: capacity on
    /// recordable media, layout length otherwise
    pub(crate) fn end_sector(&self) -> Option<u32> {
        self.disc.as_ref().map(|disc| {
            if self.recordable_disc {
                self.medium_capacity as u32
            } else {
                disc.layout_length() as u32
            }
        })
    }

    /// Switch the active profile, refreshing feature and mode-page state
    pub(crate) fn set_profile(&mut self, profile: features::Profile) {
        let end_sector = self.end_sector();
        let mut mode_pages = std::mem::take(&mut self.mode_pages);
        self.features.set_profile(profile, end_sector, &mut mode_pages);
        self.mode_pages = mode_pages;
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("number", &self.number)
            .field("loaded", &self.loaded())
            .field("profile", &self.features.current_profile())
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Device wired to a throwaway signal channel, for unit tests
    pub fn test_device() -> Device {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        std::mem::forget(rx);
        Device::initialize(
            0,
            "null",
            DeviceId::new("OPTICD", "VIRTUALCD", "1.10", ""),
            "0123456789AB".to_string(),
            DeviceOptions::default(),
            0,
            0,
            tx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_device;
    use super::*;

    #[test]
    fn test_initialized_device_has_no_medium() {
        let device = test_device();
        assert!(!device.loaded());
        assert_eq!(device.features.current_profile(), features::Profile::None);
        assert_eq!(device.media_event, MediaEvent::NoChange);
        assert!(device.recording.is_none());
    }

    #[test]
    fn test_device_id_clipping() {
        let id = DeviceId::new(
            "VENDORNAMETOOLONG",
            "A-PRODUCT-NAME-THAT-IS-TOO-LONG",
            "12345",
            "",
        );
        assert_eq!(id.vendor, "VENDORNA");
        assert_eq!(id.product, "A-PRODUCT-NAME-T");
        assert_eq!(id.revision, "1234");
    }
}
