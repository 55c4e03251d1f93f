//! Recording commands: WRITE (10)/(12), SEND CUE SHEET,
//! CLOSE TRACK/SESSION, RESERVE TRACK, SYNCHRONIZE CACHE.
//!
//! All of them require a recording strategy to be active; anything else is
//! a command sequence error.

use tracing::debug;

use opticd_common::scsi::{asc_ascq, cdb_get_u16, cdb_get_u24, cdb_get_u32, opcode, sense_key};

use super::super::kernel_io::CommandIo;
use super::super::mode_pages::{write_params, PageView};
use super::super::recording::sao_parse_cue_sheet;
use super::super::Device;

/// WRITE (10) and WRITE (12)
pub(super) fn command_write(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    // The start address may be negative (lead-in for raw SAO)
    let start_address = cdb_get_u32(cdb, 2) as i32;
    let num_sectors = if cdb[0] == opcode::WRITE_10 {
        cdb_get_u16(cdb, 7) as i32
    } else {
        cdb_get_u32(cdb, 6) as i32
    };

    debug!(target: "opticd::mmc", start_address, num_sectors, "write request");

    let Some(recording) = dev.recording else {
        debug!(target: "opticd::mmc", "no recording mode set");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
        return false;
    };

    recording.write_sectors(dev, io, start_address, num_sectors)
}

/// SEND CUE SHEET
pub(super) fn command_send_cue_sheet(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let cue_sheet_size = cdb_get_u24(cdb, 6) as usize;

    if dev.recording.is_none() {
        debug!(target: "opticd::mmc", "no recording mode set");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
        return false;
    }

    // The cue sheet only makes sense in session-at-once mode
    let write_type = dev
        .mode_pages
        .get(0x05, PageView::Current)
        .map(write_params::write_type)
        .unwrap_or(0);
    if write_type != 2 {
        debug!(target: "opticd::mmc", write_type, "CUE sheet sent outside session-at-once");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
        return false;
    }

    debug!(target: "opticd::mmc", cue_sheet_size, "reading CUE sheet");
    dev.read_buffer(io, cue_sheet_size);

    let cue = dev.cache[..cue_sheet_size.min(dev.cache_size)].to_vec();
    if !sao_parse_cue_sheet(dev, &cue) {
        debug!(target: "opticd::mmc", "failed to parse CUE sheet");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
        return false;
    }

    debug!(target: "opticd::mmc", "CUE sheet parsed");
    true
}

/// CLOSE TRACK/SESSION
pub(super) fn command_close_track_session(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let function = cdb[2] & 0x07;
    let number = cdb_get_u16(cdb, 4);

    debug!(target: "opticd::mmc", function, number, "close track/session");

    let Some(recording) = dev.recording else {
        debug!(target: "opticd::mmc", "no recording mode set");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
        return false;
    };

    match function {
        1 => {
            debug!(target: "opticd::mmc", number, "closing track");
            recording.close_track(dev)
        }
        // 5 and 6 finalize a DVD+R disc, which amounts to closing the
        // session
        2 | 5 | 6 => {
            debug!(target: "opticd::mmc", "closing session");
            recording.close_session(dev)
        }
        other => {
            debug!(target: "opticd::mmc", function = other, "unimplemented close function");
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
            false
        }
    }
}

/// RESERVE TRACK
pub(super) fn command_reserve_track(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let arsv = cdb[1] & 0x02 != 0;
    let rmz = cdb[1] & 0x01 != 0;

    debug!(target: "opticd::mmc", arsv, rmz, "reserve track");

    let Some(recording) = dev.recording else {
        debug!(target: "opticd::mmc", "RESERVE TRACK without recording mode");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
        return false;
    };

    let track_length = if !arsv {
        // Reservation size format
        let size = cdb_get_u32(cdb, 5);
        debug!(target: "opticd::mmc", size, "reservation size format");
        size
    } else {
        // Reservation LBA format: length from the next writable address
        let lba = cdb_get_u32(cdb, 5);
        debug!(target: "opticd::mmc", lba, "reservation LBA format");
        lba.saturating_sub(recording.next_writable_address(dev) as u32)
    };

    if !recording.reserve_track(dev, track_length) {
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
        return false;
    }
    true
}

/// SYNCHRONIZE CACHE
pub(super) fn command_synchronize_cache(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let lba = cdb_get_u32(cdb, 2);
    let blocks = cdb_get_u16(cdb, 7);

    debug!(target: "opticd::mmc", lba, blocks, "cache sync request");

    let Some(recording) = dev.recording else {
        debug!(target: "opticd::mmc", "no recording mode set");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
        return false;
    };

    recording.close_track(dev)
}
