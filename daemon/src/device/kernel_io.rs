//! Kernel I/O bridge.
//!
//! The control device is opened non-blocking; a per-device thread polls it
//! and performs one request cycle per readiness notification: read the
//! request header plus inbound payload, dispatch the CDB, write the
//! response header plus outbound payload. A short read or write is fatal
//! and raises the kernel-io-error signal so the owner can restart the
//! device.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, warn};

use opticd_common::proto::{RequestHeader, ResponseHeader, KERNEL_IO_BUFFER_SIZE};
use opticd_common::scsi::SenseData;

use super::{Device, DeviceSignal};

/// Per-request buffer views handed to command handlers
pub struct CommandIo<'a> {
    /// Inbound payload (host to device)
    pub input: &'a [u8],
    /// Outbound payload area (device to host)
    pub output: &'a mut [u8],
    /// Running read offset into `input`
    pub in_pos: usize,
    /// Running write offset into `output`
    pub out_pos: usize,
}

impl<'a> CommandIo<'a> {
    pub fn new(input: &'a [u8], output: &'a mut [u8]) -> Self {
        Self { input, output, in_pos: 0, out_pos: 0 }
    }
}

impl Device {
    /// Copy up to `length` cache bytes into the outbound area at the
    /// running offset
    pub(crate) fn write_buffer(&mut self, io: &mut CommandIo<'_>, length: usize) {
        let mut len = self.cache_size.min(length);

        if io.out_pos + len > io.output.len() {
            debug!(target: "opticd::kernel_io", "outbound buffer too small, truncating");
            len = io.output.len() - io.out_pos;
        }

        io.output[io.out_pos..io.out_pos + len].copy_from_slice(&self.cache[..len]);
        io.out_pos += len;
    }

    /// Copy up to `length` inbound bytes into the cache and set the cache
    /// size
    pub(crate) fn read_buffer(&mut self, io: &mut CommandIo<'_>, length: usize) {
        let mut len = (io.input.len() - io.in_pos).min(length);

        if len > self.cache.len() {
            warn!(
                target: "opticd::kernel_io",
                requested = len,
                capacity = self.cache.len(),
                "copy request exceeds cache, truncating"
            );
            len = self.cache.len();
        }

        self.cache[..len].copy_from_slice(&io.input[io.in_pos..io.in_pos + len]);
        self.cache_size = len;
        io.in_pos += len;
    }

    /// Place response bytes into the cache for a subsequent write_buffer
    pub(crate) fn stage(&mut self, data: &[u8]) {
        let len = data.len().min(self.cache.len());
        self.cache[..len].copy_from_slice(&data[..len]);
        self.cache_size = len;
    }

    /// Zero the cache and reset its size
    pub(crate) fn flush_cache(&mut self) {
        let size = self.cache_size;
        self.cache[..size].fill(0);
        self.cache_size = 0;
    }

    /// Write an 18-byte fixed-format sense record straight into the
    /// outbound area, bypassing the cache
    pub(crate) fn write_sense_full(
        &mut self,
        io: &mut CommandIo<'_>,
        sense_key: u8,
        asc_ascq: u16,
        ili: bool,
        command_info: u32,
    ) {
        let sense = SenseData::with_info(sense_key, asc_ascq, ili, command_info);
        let bytes = sense.to_bytes();
        io.output[..bytes.len()].copy_from_slice(&bytes);
        io.out_pos = bytes.len();
    }

    pub(crate) fn write_sense(&mut self, io: &mut CommandIo<'_>, sense_key: u8, asc_ascq: u16) {
        self.write_sense_full(io, sense_key, asc_ascq, false, 0);
    }
}

/// Running I/O thread attached to a control device
pub struct IoThread {
    file: Arc<File>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IoThread {
    /// Open the control device and spawn the I/O thread
    pub fn start(
        device: Arc<Mutex<Device>>,
        ctl_device: &str,
    ) -> std::io::Result<Self> {
        let file = Arc::new(
            OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(ctl_device)?,
        );

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_file = file.clone();

        let number = device.lock().map(|d| d.number()).unwrap_or(0);
        let handle = std::thread::Builder::new()
            .name(format!("opticd-io-{number}"))
            .spawn(move || io_thread_main(device, thread_file, thread_running))?;

        Ok(Self { file, running, handle: Some(handle) })
    }

    /// Control device descriptor, used for the mapping discovery ioctl
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        self.file.as_raw_fd()
    }

    /// Ask the thread to quit and join it; the control device closes with
    /// the thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn io_thread_main(device: Arc<Mutex<Device>>, file: Arc<File>, running: Arc<AtomicBool>) {
    debug!(target: "opticd::kernel_io", "I/O thread started");

    let mut kernel_buffer = vec![0u8; KERNEL_IO_BUFFER_SIZE];

    while running.load(Ordering::SeqCst) {
        // Wait for a request; the timeout lets the loop observe stop()
        let fd = file.as_raw_fd();
        let borrowed = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(500u16)) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                warn!(target: "opticd::kernel_io", error = %e, "poll failed");
                signal_error(&device);
                break;
            }
        }

        if !handle_request(&device, &file, &mut kernel_buffer) {
            signal_error(&device);
            break;
        }
    }

    debug!(target: "opticd::kernel_io", "I/O thread finished");
}

fn signal_error(device: &Arc<Mutex<Device>>) {
    if let Ok(dev) = device.lock() {
        dev.emit(DeviceSignal::KernelIoError(dev.number()));
    }
}

/// One request cycle; false on a fatal I/O error
fn handle_request(
    device: &Arc<Mutex<Device>>,
    file: &File,
    kernel_buffer: &mut [u8],
) -> bool {
    let mut file = file;
    let read_len = match file.read(kernel_buffer) {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
        Err(e) => {
            warn!(target: "opticd::kernel_io", error = %e, "control device read failed");
            return false;
        }
    };

    if read_len < RequestHeader::SIZE {
        warn!(
            target: "opticd::kernel_io",
            read = read_len,
            required = RequestHeader::SIZE,
            "short request read"
        );
        return false;
    }

    let Some(request) = RequestHeader::parse(kernel_buffer) else {
        warn!(target: "opticd::kernel_io", "malformed request header");
        return false;
    };

    debug!(
        target: "opticd::kernel_io",
        tag = request.tag,
        data_len = request.data_len,
        "request received, command {:02X}h",
        request.cdb[0]
    );

    // The handlers consume a zero-padded 12-byte CDB
    let mut cdb = [0u8; 12];
    cdb.copy_from_slice(&request.cdb[..12]);

    let in_start = RequestHeader::SIZE;
    let in_len = (request.data_len as usize).min(read_len.saturating_sub(in_start));
    let input: Vec<u8> = kernel_buffer[in_start..in_start + in_len].to_vec();

    let out_capacity = (request.data_len as usize)
        .min(KERNEL_IO_BUFFER_SIZE - ResponseHeader::SIZE);
    let mut output = vec![0u8; out_capacity.max(SenseData::SIZE)];

    let (status, out_len) = {
        let mut dev = match device.lock() {
            Ok(dev) => dev,
            Err(_) => return false,
        };
        let mut io = CommandIo::new(&input, &mut output);
        let status = commands_execute(&mut dev, &mut io, &cdb);
        (status, io.out_pos)
    };

    let response = ResponseHeader {
        tag: request.tag,
        status,
        data_len: out_len as u32,
    };

    kernel_buffer[..ResponseHeader::SIZE].copy_from_slice(&response.to_bytes());
    kernel_buffer[ResponseHeader::SIZE..ResponseHeader::SIZE + out_len]
        .copy_from_slice(&output[..out_len]);

    let write_len = ResponseHeader::SIZE + out_len;
    match file.write(&kernel_buffer[..write_len]) {
        Ok(written) if written >= ResponseHeader::SIZE => {
            debug!(target: "opticd::kernel_io", tag = response.tag, status, "response written");
            true
        }
        Ok(written) => {
            warn!(target: "opticd::kernel_io", written, "short response write");
            false
        }
        Err(e) => {
            warn!(target: "opticd::kernel_io", error = %e, "control device write failed");
            false
        }
    }
}

fn commands_execute(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> u32 {
    super::commands::execute_command(dev, io, cdb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::test_device;

    #[test]
    fn test_write_buffer_appends_at_offset() {
        let mut dev = test_device();
        dev.cache[..4].copy_from_slice(&[1, 2, 3, 4]);
        dev.cache_size = 4;

        let input = [0u8; 0];
        let mut output = [0u8; 8];
        let mut io = CommandIo::new(&input, &mut output);

        dev.write_buffer(&mut io, 4);
        assert_eq!(io.out_pos, 4);

        dev.cache[..2].copy_from_slice(&[9, 9]);
        dev.cache_size = 2;
        dev.write_buffer(&mut io, 2);
        assert_eq!(io.out_pos, 6);
        assert_eq!(&output[..6], &[1, 2, 3, 4, 9, 9]);
    }

    #[test]
    fn test_write_buffer_truncates_to_output() {
        let mut dev = test_device();
        dev.cache_size = 100;

        let input = [0u8; 0];
        let mut output = [0u8; 10];
        let mut io = CommandIo::new(&input, &mut output);
        dev.write_buffer(&mut io, 100);
        assert_eq!(io.out_pos, 10);
    }

    #[test]
    fn test_read_buffer_tracks_position() {
        let mut dev = test_device();
        let input = [5u8, 6, 7, 8, 9, 10];
        let mut output = [0u8; 0];
        let mut io = CommandIo::new(&input, &mut output);

        dev.read_buffer(&mut io, 4);
        assert_eq!(dev.cache_size, 4);
        assert_eq!(&dev.cache[..4], &[5, 6, 7, 8]);

        dev.read_buffer(&mut io, 4);
        assert_eq!(dev.cache_size, 2);
        assert_eq!(&dev.cache[..2], &[9, 10]);
    }

    #[test]
    fn test_flush_cache_zeroes() {
        let mut dev = test_device();
        dev.cache[..3].copy_from_slice(&[1, 2, 3]);
        dev.cache_size = 3;
        dev.flush_cache();
        assert_eq!(dev.cache_size, 0);
        assert_eq!(&dev.cache[..3], &[0, 0, 0]);
    }

    #[test]
    fn test_write_sense_bypasses_cache() {
        let mut dev = test_device();
        dev.cache_size = 50;

        let input = [0u8; 0];
        let mut output = [0u8; 64];
        let mut io = CommandIo::new(&input, &mut output);
        io.out_pos = 30;

        dev.write_sense(
            &mut io,
            opticd_common::scsi::sense_key::NOT_READY,
            opticd_common::scsi::asc_ascq::MEDIUM_NOT_PRESENT,
        );

        // Sense lands at the start of the outbound area, not at out_pos
        assert_eq!(io.out_pos, 18);
        assert_eq!(output[0], 0x70);
        assert_eq!(output[2], 0x02);
        assert_eq!(output[12], 0x3A);
    }
}
