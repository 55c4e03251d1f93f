//! Daemon: owns the device set and the management loop.
//!
//! Each device runs its own I/O thread; the daemon's current-thread tokio
//! runtime consumes the cross-thread device signals. A kernel I/O error
//! restarts the affected device (stop, then start) once its old I/O thread
//! has returned; mapping discovery is retried until the kernel has
//! registered the virtual host.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use opticd_common::{DaemonConfig, DaemonError, OptionValue};

use crate::device::kernel_io::IoThread;
use crate::device::{Device, DeviceId, DeviceOptions, DeviceSignal};

/// Delay between mapping discovery attempts
const MAPPING_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// One managed device: shared state plus its running I/O thread
pub struct DeviceHandle {
    pub device: Arc<Mutex<Device>>,
    ctl_device: String,
    io: Option<IoThread>,
}

impl DeviceHandle {
    /// Open the control device and spawn the I/O thread
    pub fn start(&mut self) -> Result<()> {
        if self.io.is_some() {
            return Ok(());
        }
        let io = IoThread::start(self.device.clone(), &self.ctl_device)
            .with_context(|| format!("failed to open control device {}", self.ctl_device))?;
        self.io = Some(io);
        Ok(())
    }

    /// Stop the I/O thread and release the control device
    pub fn stop(&mut self) {
        if let Some(mut io) = self.io.take() {
            io.stop();
        }
        if let Ok(mut dev) = self.device.lock() {
            dev.clear_mapping();
        }
    }

    fn try_setup_mapping(&self) -> bool {
        let Some(io) = self.io.as_ref() else {
            return false;
        };
        let fd = io.raw_fd();
        match self.device.lock() {
            Ok(mut dev) => dev.setup_mapping(fd),
            Err(_) => false,
        }
    }
}

/// The daemon: devices plus the signal channel ends
pub struct Daemon {
    devices: Vec<DeviceHandle>,
    signals: UnboundedReceiver<DeviceSignal>,
    signal_sender: UnboundedSender<DeviceSignal>,
}

impl Daemon {
    /// Build the device set from the configuration
    pub fn new(config: &DaemonConfig) -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let mut devices = Vec::new();
        for number in 0..config.general.num_devices as u32 {
            let id = DeviceId::new(
                &config.identity.vendor,
                &config.identity.product,
                &config.identity.revision,
                &config.identity.vendor_specific,
            );
            let options = DeviceOptions {
                dpm_emulation: config.options.dpm_emulation,
                tr_emulation: config.options.tr_emulation,
                bad_sector_emulation: config.options.bad_sector_emulation,
                dvd_report_css: config.options.dvd_report_css,
            };
            let device = Device::initialize(
                number,
                &config.general.audio_driver,
                id,
                config.identity.serial.clone(),
                options,
                config.debug.daemon_mask,
                config.debug.library_mask,
                tx.clone(),
            );

            devices.push(DeviceHandle {
                device: Arc::new(Mutex::new(device)),
                ctl_device: config.general.ctl_device.replace("%d", &number.to_string()),
                io: None,
            });
        }

        Self { devices, signals: rx, signal_sender: tx }
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, number: u32) -> Option<&DeviceHandle> {
        self.devices.get(number as usize)
    }

    pub fn device_mut(&mut self, number: u32) -> Option<&mut DeviceHandle> {
        self.devices.get_mut(number as usize)
    }

    /// Start every device's I/O thread
    pub fn start_all(&mut self) -> Result<()> {
        for handle in &mut self.devices {
            handle.start()?;
        }
        Ok(())
    }

    /// Stop every device
    pub fn stop_all(&mut self) {
        for handle in &mut self.devices {
            handle.stop();
        }
    }

    /// Load an image into a device (management surface entry point)
    pub fn load_disc(
        &self,
        number: u32,
        filenames: &[PathBuf],
        options: &HashMap<String, Value>,
    ) -> Result<(), DaemonError> {
        let handle = self
            .device(number)
            .ok_or_else(|| DaemonError::InvalidArgument(format!("no device {number}")))?;
        let mut dev = handle
            .device
            .lock()
            .map_err(|_| DaemonError::Daemon("device lock poisoned".to_string()))?;
        dev.load_disc(filenames, options)
    }

    /// Unload a device's disc
    pub fn unload_disc(&self, number: u32) -> Result<(), DaemonError> {
        let handle = self
            .device(number)
            .ok_or_else(|| DaemonError::InvalidArgument(format!("no device {number}")))?;
        let mut dev = handle
            .device
            .lock()
            .map_err(|_| DaemonError::Daemon("device lock poisoned".to_string()))?;
        dev.unload_disc()
    }

    /// Read a device option
    pub fn get_option(&self, number: u32, name: &str) -> Result<OptionValue, DaemonError> {
        let handle = self
            .device(number)
            .ok_or_else(|| DaemonError::InvalidArgument(format!("no device {number}")))?;
        let dev = handle
            .device
            .lock()
            .map_err(|_| DaemonError::Daemon("device lock poisoned".to_string()))?;
        dev.get_option(name)
    }

    /// Change a device option
    pub fn set_option(
        &self,
        number: u32,
        name: &str,
        value: OptionValue,
    ) -> Result<(), DaemonError> {
        let handle = self
            .device(number)
            .ok_or_else(|| DaemonError::InvalidArgument(format!("no device {number}")))?;
        let mut dev = handle
            .device
            .lock()
            .map_err(|_| DaemonError::Daemon("device lock poisoned".to_string()))?;
        dev.set_option(name, value)
    }

    /// Run the management loop until shutdown
    pub async fn run(&mut self) -> Result<()> {
        self.start_all()?;
        info!(devices = self.devices.len(), "daemon running");

        // Kick off mapping discovery for every device
        for number in 0..self.devices.len() as u32 {
            self.schedule_mapping_retry(number, Duration::ZERO);
        }

        loop {
            tokio::select! {
                signal = self.signals.recv() => {
                    let Some(signal) = signal else {
                        break;
                    };
                    self.handle_signal(signal);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    break;
                }
            }
        }

        self.stop_all();
        Ok(())
    }

    fn handle_signal(&mut self, signal: DeviceSignal) {
        match signal {
            DeviceSignal::StatusChanged(number) => {
                debug!(target: "opticd::device", number, "status changed");
            }
            DeviceSignal::OptionChanged(number, option) => {
                debug!(target: "opticd::device", number, option = %option, "option changed");
            }
            DeviceSignal::MappingReady(number) => {
                debug!(target: "opticd::device", number, "mapping ready");
            }
            DeviceSignal::KernelIoError(number) => {
                // The I/O thread has already bailed out; restart the
                // device on this (main) thread
                warn!(target: "opticd::device", number, "kernel I/O error, restarting device");
                if let Some(handle) = self.device_mut(number) {
                    handle.stop();
                    if let Err(e) = handle.start() {
                        warn!(
                            target: "opticd::device",
                            number,
                            error = %e,
                            "failed to restart device"
                        );
                    } else {
                        self.schedule_mapping_retry(number, Duration::ZERO);
                    }
                }
            }
            DeviceSignal::MappingRetry(number) => {
                if let Some(handle) = self.device(number) {
                    if handle.try_setup_mapping() {
                        // Virtual host not registered yet
                        self.schedule_mapping_retry(number, MAPPING_RETRY_INTERVAL);
                    }
                }
            }
        }
    }

    fn schedule_mapping_retry(&self, number: u32, delay: Duration) {
        let sender = self.signal_sender.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = sender.send(DeviceSignal::MappingRetry(number));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(num_devices: usize) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.general.num_devices = num_devices;
        config
    }

    #[test]
    fn test_daemon_builds_devices() {
        let daemon = Daemon::new(&test_config(3));
        assert_eq!(daemon.num_devices(), 3);
        assert!(daemon.device(2).is_some());
        assert!(daemon.device(3).is_none());

        let dev = daemon.device(0).unwrap().device.lock().unwrap();
        assert_eq!(dev.number(), 0);
        assert!(!dev.loaded());
    }

    #[test]
    fn test_management_calls_reach_device() {
        let daemon = Daemon::new(&test_config(1));

        assert!(daemon.get_option(0, "dpm-emulation").is_ok());
        assert!(daemon.set_option(0, "dpm-emulation", serde_json::json!(true)).is_ok());
        assert_eq!(
            daemon.get_option(0, "dpm-emulation").unwrap(),
            serde_json::json!(true)
        );

        assert!(matches!(
            daemon.get_option(9, "dpm-emulation"),
            Err(DaemonError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unload_without_disc_is_ok() {
        let daemon = Daemon::new(&test_config(1));
        assert!(daemon.unload_disc(0).is_ok());
    }
}
