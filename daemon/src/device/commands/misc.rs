//! Unit state and audio commands: TEST UNIT READY, START/STOP UNIT,
//! PREVENT/ALLOW MEDIUM REMOVAL, PLAY AUDIO (10)/(12)/MSF, PAUSE/RESUME.

use tracing::debug;

use opticd_common::scsi::{asc_ascq, audio_status, cdb_get_u16, cdb_get_u32, opcode, sense_key};

use super::super::kernel_io::CommandIo;
use super::super::mode_pages::capabilities;
use super::super::{Device, MediaEvent};
use crate::image::msf::msf_to_lba;
use opticd_common::DaemonError;

/// TEST UNIT READY
pub(super) fn command_test_unit_ready(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    _cdb: &[u8; 12],
) -> bool {
    if !dev.loaded() {
        debug!(target: "opticd::mmc", "medium not present");
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    // A medium change is reported once as a unit attention; the SCSI layer
    // relies on it to refresh the medium block size
    if dev.media_event == MediaEvent::NewMedia {
        debug!(target: "opticd::mmc", "reporting media changed");
        dev.media_event = MediaEvent::NoChange;
        dev.write_sense(io, sense_key::UNIT_ATTENTION, asc_ascq::NOT_READY_TO_READY_CHANGE);
        return false;
    }

    true
}

/// START/STOP UNIT
pub(super) fn command_start_stop_unit(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let lo_ej = cdb[4] & 0x02 != 0;
    let start = cdb[4] & 0x01 != 0;

    debug!(target: "opticd::mmc", lo_ej, start, "start/stop unit");

    if lo_ej && !start {
        debug!(target: "opticd::mmc", "unloading disc");
        if let Err(DaemonError::DeviceLocked) = dev.unload_disc_locked(false) {
            debug!(target: "opticd::mmc", "failed to unload disc");
            dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_REMOVAL_PREVENTED);
            return false;
        }
    }

    true
}

/// PREVENT/ALLOW MEDIUM REMOVAL
pub(super) fn command_prevent_allow_medium_removal(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let prevent = cdb[4] & 0x01 != 0;
    let _ = io;

    dev.locked = prevent;
    if let Some(page) = dev.mode_pages.get_current_mut(0x2A) {
        capabilities::set_lock_state(page, prevent);
    }

    debug!(target: "opticd::mmc", locked = prevent, "medium removal lock");
    true
}

/// PLAY AUDIO (10), (12) and MSF
pub(super) fn command_play_audio(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    let (start_sector, end_sector);
    if cdb[0] == opcode::PLAY_AUDIO_10 {
        start_sector = cdb_get_u32(cdb, 2) as i32;
        end_sector = start_sector + cdb_get_u16(cdb, 7) as i32;
    } else if cdb[0] == opcode::PLAY_AUDIO_12 {
        start_sector = cdb_get_u32(cdb, 2) as i32;
        end_sector = start_sector + cdb_get_u32(cdb, 6) as i32;
    } else {
        start_sector = msf_to_lba(cdb[3], cdb[4], cdb[5], true);
        end_sector = msf_to_lba(cdb[6], cdb[7], cdb[8], true);
    }

    if !dev.loaded() {
        debug!(target: "opticd::mmc", "medium not present");
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    debug!(target: "opticd::mmc", start_sector, end_sector, "playing audio");

    if !dev.audio.start(dev.disc.as_ref().unwrap(), start_sector, end_sector) {
        debug!(target: "opticd::mmc", "failed to start audio play");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    true
}

/// PAUSE/RESUME
pub(super) fn command_pause_resume(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    let resume = cdb[8] & 0x01 != 0;
    let status = dev.audio.status();

    // Requesting either operation outside a play context is an error;
    // being already in the target state is not
    if status != audio_status::PAUSED && status != audio_status::PLAYING {
        debug!(target: "opticd::mmc", resume, status, "pause/resume in invalid state");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
        return false;
    }

    if resume && status != audio_status::PLAYING {
        dev.audio.resume();
    }
    if !resume && status != audio_status::PAUSED {
        dev.audio.pause();
    }

    true
}
