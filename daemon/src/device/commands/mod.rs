//! MMC packet command interpreter.
//!
//! A table maps opcodes to handlers; the dispatch wrapper flushes the data
//! cache, optionally interrupts audio playback, and turns a handler's
//! boolean result into GOOD / CHECK CONDITION. A failing handler has
//! already written its sense record into the outbound buffer.

mod misc;
mod mode;
mod read;
mod toc;
mod write;

use tracing::debug;

use opticd_common::scsi::{asc_ascq, audio_status, opcode, sense_key, status};

use super::kernel_io::CommandIo;
use super::Device;
use crate::image::sector::Sector;
use crate::image::{SectorType, SubchannelFormat};

type Handler = fn(&mut Device, &mut CommandIo<'_>, &[u8; 12]) -> bool;

struct PacketCommand {
    opcode: u8,
    name: &'static str,
    handler: Handler,
    interrupts_audio: bool,
}

static PACKET_COMMANDS: &[PacketCommand] = &[
    PacketCommand { opcode: opcode::CLOSE_TRACK_SESSION, name: "CLOSE TRACK/SESSION", handler: write::command_close_track_session, interrupts_audio: true },
    PacketCommand { opcode: opcode::GET_EVENT_STATUS_NOTIFICATION, name: "GET EVENT/STATUS NOTIFICATION", handler: mode::command_get_event_status_notification, interrupts_audio: false },
    PacketCommand { opcode: opcode::GET_CONFIGURATION, name: "GET CONFIGURATION", handler: mode::command_get_configuration, interrupts_audio: false },
    PacketCommand { opcode: opcode::GET_PERFORMANCE, name: "GET PERFORMANCE", handler: mode::command_get_performance, interrupts_audio: false },
    PacketCommand { opcode: opcode::INQUIRY, name: "INQUIRY", handler: mode::command_inquiry, interrupts_audio: false },
    PacketCommand { opcode: opcode::MODE_SELECT_6, name: "MODE SELECT (6)", handler: mode::command_mode_select, interrupts_audio: false },
    PacketCommand { opcode: opcode::MODE_SELECT_10, name: "MODE SELECT (10)", handler: mode::command_mode_select, interrupts_audio: false },
    PacketCommand { opcode: opcode::MODE_SENSE_6, name: "MODE SENSE (6)", handler: mode::command_mode_sense, interrupts_audio: false },
    PacketCommand { opcode: opcode::MODE_SENSE_10, name: "MODE SENSE (10)", handler: mode::command_mode_sense, interrupts_audio: false },
    PacketCommand { opcode: opcode::PAUSE_RESUME, name: "PAUSE/RESUME", handler: misc::command_pause_resume, interrupts_audio: false },
    PacketCommand { opcode: opcode::PLAY_AUDIO_10, name: "PLAY AUDIO (10)", handler: misc::command_play_audio, interrupts_audio: true },
    PacketCommand { opcode: opcode::PLAY_AUDIO_12, name: "PLAY AUDIO (12)", handler: misc::command_play_audio, interrupts_audio: true },
    PacketCommand { opcode: opcode::PLAY_AUDIO_MSF, name: "PLAY AUDIO MSF", handler: misc::command_play_audio, interrupts_audio: true },
    PacketCommand { opcode: opcode::PREVENT_ALLOW_MEDIUM_REMOVAL, name: "PREVENT/ALLOW MEDIUM REMOVAL", handler: misc::command_prevent_allow_medium_removal, interrupts_audio: false },
    PacketCommand { opcode: opcode::READ_10, name: "READ (10)", handler: read::command_read, interrupts_audio: true },
    PacketCommand { opcode: opcode::READ_12, name: "READ (12)", handler: read::command_read, interrupts_audio: true },
    PacketCommand { opcode: opcode::READ_BUFFER_CAPACITY, name: "READ BUFFER CAPACITY", handler: read::command_read_buffer_capacity, interrupts_audio: false },
    PacketCommand { opcode: opcode::READ_CAPACITY, name: "READ CAPACITY", handler: read::command_read_capacity, interrupts_audio: false },
    PacketCommand { opcode: opcode::READ_CD, name: "READ CD", handler: read::command_read_cd, interrupts_audio: false },
    PacketCommand { opcode: opcode::READ_CD_MSF, name: "READ CD MSF", handler: read::command_read_cd, interrupts_audio: false },
    PacketCommand { opcode: opcode::READ_DISC_INFORMATION, name: "READ DISC INFORMATION", handler: toc::command_read_disc_information, interrupts_audio: true },
    PacketCommand { opcode: opcode::READ_DISC_STRUCTURE, name: "READ DISC STRUCTURE", handler: toc::command_read_disc_structure, interrupts_audio: true },
    PacketCommand { opcode: opcode::READ_TOC_PMA_ATIP, name: "READ TOC/PMA/ATIP", handler: toc::command_read_toc_pma_atip, interrupts_audio: false },
    PacketCommand { opcode: opcode::READ_TRACK_INFORMATION, name: "READ TRACK INFORMATION", handler: toc::command_read_track_information, interrupts_audio: true },
    PacketCommand { opcode: opcode::READ_SUBCHANNEL, name: "READ SUBCHANNEL", handler: toc::command_read_subchannel, interrupts_audio: false },
    PacketCommand { opcode: opcode::REPORT_KEY, name: "REPORT KEY", handler: mode::command_report_key, interrupts_audio: true },
    PacketCommand { opcode: opcode::REQUEST_SENSE, name: "REQUEST SENSE", handler: mode::command_request_sense, interrupts_audio: false },
    PacketCommand { opcode: opcode::RESERVE_TRACK, name: "RESERVE TRACK", handler: write::command_reserve_track, interrupts_audio: true },
    PacketCommand { opcode: opcode::SEEK_10, name: "SEEK (10)", handler: read::command_seek, interrupts_audio: true },
    PacketCommand { opcode: opcode::SEND_CUE_SHEET, name: "SEND CUE SHEET", handler: write::command_send_cue_sheet, interrupts_audio: true },
    PacketCommand { opcode: opcode::SET_CD_SPEED, name: "SET CD SPEED", handler: mode::command_set_cd_speed, interrupts_audio: true },
    PacketCommand { opcode: opcode::SET_STREAMING, name: "SET STREAMING", handler: mode::command_set_streaming, interrupts_audio: true },
    PacketCommand { opcode: opcode::START_STOP_UNIT, name: "START/STOP UNIT", handler: misc::command_start_stop_unit, interrupts_audio: true },
    PacketCommand { opcode: opcode::SYNCHRONIZE_CACHE, name: "SYNCHRONIZE CACHE", handler: write::command_synchronize_cache, interrupts_audio: false },
    PacketCommand { opcode: opcode::TEST_UNIT_READY, name: "TEST UNIT READY", handler: misc::command_test_unit_ready, interrupts_audio: false },
    PacketCommand { opcode: opcode::WRITE_10, name: "WRITE (10)", handler: write::command_write, interrupts_audio: true },
    PacketCommand { opcode: opcode::WRITE_12, name: "WRITE (12)", handler: write::command_write, interrupts_audio: true },
];

/// Execute one packet command; the per-device lock is held by the caller
pub fn execute_command(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> u32 {
    dev.flush_cache();

    debug!(
        target: "opticd::mmc",
        "packet command: {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X}",
        cdb[0], cdb[1], cdb[2], cdb[3], cdb[4], cdb[5],
        cdb[6], cdb[7], cdb[8], cdb[9], cdb[10], cdb[11]
    );

    let Some(command) = PACKET_COMMANDS.iter().find(|c| c.opcode == cdb[0]) else {
        debug!(target: "opticd::mmc", "packet command {:02X}h not implemented", cdb[0]);
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_COMMAND_OPERATION_CODE);
        return status::CHECK_CONDITION;
    };

    debug!(target: "opticd::mmc", command = command.name, "dispatching");

    // Stop audio playback when the command interrupts it
    if command.interrupts_audio {
        let audio = dev.audio.status();
        if audio == audio_status::PLAYING || audio == audio_status::PAUSED {
            dev.audio.stop();
        }
    }

    let succeeded = (command.handler)(dev, io, cdb);
    let result = if succeeded { status::GOOD } else { status::CHECK_CONDITION };

    debug!(target: "opticd::mmc", command = command.name, status = result, "command completed");
    result
}

// ============================================================================
// Shared handler helpers
// ============================================================================

/// Map the expected-sector-type CDB field to a concrete type; `Ok(None)`
/// matches all types
pub(crate) fn map_expected_sector_type(code: u8) -> Result<Option<SectorType>, ()> {
    match code {
        0 => Ok(None),
        1 => Ok(Some(SectorType::Audio)),
        2 => Ok(Some(SectorType::Mode1)),
        3 => Ok(Some(SectorType::Mode2)),
        4 => Ok(Some(SectorType::Mode2Form1)),
        5 => Ok(Some(SectorType::Mode2Form2)),
        _ => Err(()),
    }
}

/// Assemble the response bytes for one sector according to the main
/// channel selection byte and subchannel selector of READ CD
pub(crate) fn read_sector_data(sector: &mut Sector, mcsb: u8, subchannel: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(2352 + 296 + 96);

    if mcsb != 0 {
        if mcsb & 0x80 != 0 {
            out.extend_from_slice(sector.sync());
        }
        if mcsb & 0x40 != 0 {
            out.extend_from_slice(sector.header());
        }
        if mcsb & 0x20 != 0 {
            out.extend_from_slice(sector.subheader());
        }
        if mcsb & 0x10 != 0 {
            out.extend_from_slice(sector.data());
        }
        if mcsb & 0x08 != 0 {
            out.extend_from_slice(sector.edc_ecc());
        }
        // C2 error bits: always clean, so zero-filled
        match (mcsb >> 1) & 0x03 {
            0x01 => out.extend_from_slice(&[0u8; 294]),
            0x02 => out.extend_from_slice(&[0u8; 296]),
            _ => {}
        }
    }

    match subchannel {
        0x01 => out.extend_from_slice(&sector.subchannel(SubchannelFormat::Pw)),
        0x02 => out.extend_from_slice(&sector.subchannel(SubchannelFormat::Q)),
        _ => {}
    }

    out
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Run a CDB against a device, returning (status, outbound bytes)
    pub fn run_command(dev: &mut Device, cdb: [u8; 12], input: &[u8]) -> (u32, Vec<u8>) {
        let mut output = vec![0u8; opticd_common::proto::KERNEL_IO_BUFFER_SIZE];
        let mut io = CommandIo::new(input, &mut output);
        let status = execute_command(dev, &mut io, &cdb);
        let len = io.out_pos;
        output.truncate(len);
        (status, output)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::run_command;
    use super::*;
    use crate::device::test_support::test_device;
    use std::collections::HashMap;
    use std::io::Write as _;

    /// Device with a small Mode 1 ISO loaded
    fn loaded_device(sectors: usize) -> (Device, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.iso");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![0x42u8; sectors * 2048]).unwrap();
        drop(file);

        let mut dev = test_device();
        dev.load_disc(&[path], &HashMap::new()).unwrap();
        (dev, dir)
    }

    #[test]
    fn test_unknown_opcode_yields_sense() {
        let mut dev = test_device();
        let (status, out) = run_command(&mut dev, [0xEE; 12], &[]);
        assert_eq!(status, status::CHECK_CONDITION);
        assert_eq!(out[0], 0x70);
        assert_eq!(out[2], sense_key::ILLEGAL_REQUEST);
        assert_eq!(out[12], 0x20); // INVALID COMMAND OPERATION CODE
    }

    #[test]
    fn test_dispatch_outcome_shape() {
        // After dispatch, the outbound buffer either starts a valid reply
        // or a fixed-format sense record
        let mut dev = test_device();

        // TEST UNIT READY without a medium: sense
        let (status, out) = run_command(&mut dev, [0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], &[]);
        assert_eq!(status, status::CHECK_CONDITION);
        assert_eq!(out[0], 0x70);

        // INQUIRY: valid reply payload
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::INQUIRY;
        cdb[4] = 96;
        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        assert_eq!(out[0], 0x05); // CD-ROM peripheral type
    }

    #[test]
    fn test_expected_sector_type_mapping() {
        assert_eq!(map_expected_sector_type(0), Ok(None));
        assert_eq!(map_expected_sector_type(2), Ok(Some(SectorType::Mode1)));
        assert_eq!(map_expected_sector_type(5), Ok(Some(SectorType::Mode2Form2)));
        assert!(map_expected_sector_type(6).is_err());
    }

    #[test]
    fn test_tur_reports_unit_attention_once_after_load() {
        let (mut dev, _dir) = loaded_device(10);
        let tur = [0u8; 12];

        // First TUR after the media change: unit attention
        let (status, out) = run_command(&mut dev, tur, &[]);
        assert_eq!(status, status::CHECK_CONDITION);
        assert_eq!(out[2], sense_key::UNIT_ATTENTION);
        assert_eq!(out[12], 0x28); // NOT READY TO READY CHANGE

        // Second TUR: ready
        let (status, out) = run_command(&mut dev, tur, &[]);
        assert_eq!(status, status::GOOD);
        assert!(out.is_empty());
    }

    #[test]
    fn test_read_capacity_reports_leadout_minus_one() {
        let (mut dev, _dir) = loaded_device(1000);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::READ_CAPACITY;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        // 1000 data sectors from LBA 0: lead-out starts at 1000
        assert_eq!(u32::from_be_bytes(out[0..4].try_into().unwrap()), 999);
        assert_eq!(u32::from_be_bytes(out[4..8].try_into().unwrap()), 2048);
    }

    #[test]
    fn test_mode_sense_10_returns_all_pages_ascending() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::MODE_SENSE_10;
        cdb[2] = 0x3F;
        cdb[7] = 0x10;
        cdb[8] = 0x00; // allocation length 0x1000

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);

        // Walk the pages behind the 8-byte header: ascending codes, each
        // length byte matching its payload
        let mut codes = Vec::new();
        let mut pos = 8;
        while pos + 2 <= out.len() {
            let code = out[pos] & 0x3F;
            let length = out[pos + 1] as usize;
            codes.push(code);
            pos += 2 + length;
        }
        assert_eq!(pos, out.len());
        assert_eq!(codes, vec![0x01, 0x05, 0x0D, 0x0E, 0x1A, 0x2A]);
    }

    #[test]
    fn test_mode_sense_saved_pages_unsupported() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::MODE_SENSE_10;
        cdb[2] = 0xC0 | 0x01; // PC = 3, page 0x01
        cdb[8] = 0xFF;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::CHECK_CONDITION);
        assert_eq!(out[12], 0x39); // SAVING PARAMETERS NOT SUPPORTED
    }

    #[test]
    fn test_read_10_returns_user_data() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::READ_10;
        cdb[5] = 2; // LBA 2
        cdb[8] = 2; // two sectors

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        assert_eq!(out.len(), 2 * 2048);
        assert!(out.iter().all(|&b| b == 0x42));
        assert_eq!(dev.current_address, 3);
    }

    #[test]
    fn test_read_cd_full_raw_frame() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::READ_CD;
        cdb[5] = 0; // LBA 0
        cdb[8] = 1; // one sector
        cdb[9] = 0xF8; // sync + header + data + EDC/ECC

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        assert_eq!(out.len(), 2352);

        // The frame must match the image's sector synthesized raw
        let mut sector = dev.disc.as_mut().unwrap().get_sector(0).unwrap();
        assert_eq!(&out[..], &sector.raw_frame()[..]);
    }

    #[test]
    fn test_read_cd_expected_type_mismatch() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::READ_CD;
        cdb[1] = 1 << 2; // expect CD-DA on a Mode 1 disc
        cdb[8] = 1;
        cdb[9] = 0x10;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::CHECK_CONDITION);
        assert_eq!(out[12], 0x64); // ILLEGAL MODE FOR THIS TRACK
    }

    #[test]
    fn test_read_subchannel_current_position() {
        let (mut dev, _dir) = loaded_device(10);

        // Read LBA 4 first so the current address moves there
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::READ_10;
        cdb[5] = 4;
        cdb[8] = 1;
        let (status, _) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);

        let mut cdb = [0u8; 12];
        cdb[0] = opcode::READ_SUBCHANNEL;
        cdb[1] = 0x02; // MSF
        cdb[2] = 0x40; // SubQ
        cdb[3] = 0x01; // current position
        cdb[8] = 48;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        assert_eq!(out[4], 0x01); // format code
        assert_eq!(out[6], 1); // track 1, HEX
        // Absolute MSF of LBA 4 is 00:02:04, reported in HEX
        assert_eq!(&out[9..12], &[0, 2, 4]);
        // Track-relative MSF counts from the index 1 point
        assert_eq!(&out[13..16], &[0, 0, 4]);
    }

    #[test]
    fn test_read_toc_formatted_single_track() {
        let (mut dev, _dir) = loaded_device(300);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::READ_TOC_PMA_ATIP;
        cdb[8] = 0xFF;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        assert_eq!(out[2], 1); // first track
        assert_eq!(out[3], 1); // last track

        // Track 1 at LBA 0, lead-out at LBA 300
        assert_eq!(out[6], 1);
        assert_eq!(u32::from_be_bytes(out[8..12].try_into().unwrap()), 0);
        assert_eq!(out[14], 0xAA);
        assert_eq!(u32::from_be_bytes(out[16..20].try_into().unwrap()), 300);
    }

    #[test]
    fn test_get_configuration_filters_by_rt() {
        let (mut dev, _dir) = loaded_device(10);

        // RT 0x02: exactly the profile list feature
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::GET_CONFIGURATION;
        cdb[1] = 0x02;
        cdb[7] = 0xFF;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);

        // Current profile: CD-ROM
        assert_eq!(u16::from_be_bytes([out[6], out[7]]), 0x0008);
        // Single feature descriptor: code 0x0000
        assert_eq!(u16::from_be_bytes([out[8], out[9]]), 0x0000);
        let total = u32::from_be_bytes(out[0..4].try_into().unwrap()) as usize;
        assert_eq!(total + 4, out.len());
    }

    #[test]
    fn test_get_event_reports_and_clears_media_event() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::GET_EVENT_STATUS_NOTIFICATION;
        cdb[1] = 0x01; // IMMED
        cdb[4] = 0x10; // media class
        cdb[8] = 0xFF;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        assert_eq!(out[2], 0x04); // media notification class
        assert_eq!(out[4], 2); // new media event
        assert_eq!(out[5], 0x02); // medium present

        // The event is consumed
        let (_, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(out[4], 0); // no change
    }

    #[test]
    fn test_get_event_async_rejected() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::GET_EVENT_STATUS_NOTIFICATION;
        cdb[4] = 0x10;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::CHECK_CONDITION);
        assert_eq!(out[12], 0x24); // INVALID FIELD IN CDB
    }

    #[test]
    fn test_write_without_recording_mode_is_sequence_error() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::WRITE_10;
        cdb[8] = 1;

        let (status, out) = run_command(&mut dev, cdb, &vec![0u8; 2048]);
        assert_eq!(status, status::CHECK_CONDITION);
        assert_eq!(out[12], 0x2C); // COMMAND SEQUENCE ERROR
    }

    #[test]
    fn test_prevent_allow_updates_lock_and_mode_page() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::PREVENT_ALLOW_MEDIUM_REMOVAL;
        cdb[4] = 0x01;

        let (status, _) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        assert!(dev.locked);
        let page = dev.mode_pages.get(0x2A, crate::device::mode_pages::PageView::Current).unwrap();
        assert_eq!(page[6] & 0x02, 0x02);

        // Eject while locked: MEDIUM REMOVAL PREVENTED, eject request
        // event raised anyway
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::START_STOP_UNIT;
        cdb[4] = 0x02; // LoEj, start clear
        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::CHECK_CONDITION);
        assert_eq!(out[2], sense_key::NOT_READY);
        assert_eq!(out[12], 0x53);
        assert_eq!(dev.media_event, crate::device::MediaEvent::EjectRequest);
        assert!(dev.loaded());
    }

    #[test]
    fn test_report_key_rpc() {
        let (mut dev, _dir) = loaded_device(10);
        let mut cdb = [0u8; 12];
        cdb[0] = opcode::REPORT_KEY;
        cdb[9] = 0xFF;
        cdb[10] = 0x08;

        let (status, out) = run_command(&mut dev, cdb, &[]);
        assert_eq!(status, status::GOOD);
        assert_eq!(out[4], (4 << 3) | 5);
        assert_eq!(out[5], 0xFF);
        assert_eq!(out[6], 0x01);
    }

    #[test]
    fn test_read_sector_data_full_mode1_frame() {
        let data = vec![0x5Au8; 2048];
        let mut sector = Sector::feed_data(
            16,
            SectorType::Mode1,
            &data,
            SubchannelFormat::None,
            &[],
            Default::default(),
        )
        .unwrap();

        // Sync + header + data + EDC/ECC = full 2352-byte frame
        let out = read_sector_data(&mut sector, 0xF8, 0x00);
        assert_eq!(out.len(), 2352);
        assert_eq!(&out[..], &sector.raw_frame()[..]);

        // Data only
        let out = read_sector_data(&mut sector, 0x10, 0x00);
        assert_eq!(out.len(), 2048);

        // Data + Q subchannel
        let out = read_sector_data(&mut sector, 0x10, 0x02);
        assert_eq!(out.len(), 2048 + 16);

        // C2 error block data adds 294 zero bytes
        let out = read_sector_data(&mut sector, 0x12, 0x00);
        assert_eq!(out.len(), 2048 + 294);
    }
}
