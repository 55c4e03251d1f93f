//! Read-path commands: READ (10)/(12), READ CD, READ CD MSF,
//! READ CAPACITY, READ BUFFER CAPACITY, SEEK (10).

use tracing::debug;

use opticd_common::proto::KERNEL_IO_BUFFER_SIZE;
use opticd_common::scsi::{asc_ascq, cdb_get_u16, cdb_get_u24, cdb_get_u32, opcode, sense_key};

use super::super::features::Profile;
use super::super::kernel_io::CommandIo;
use super::super::mode_pages::{error_recovery, PageView};
use super::super::Device;
use super::{map_expected_sector_type, read_sector_data};
use crate::image::msf::msf_to_lba;
use crate::image::SectorType;

/// READ (10) and READ (12)
pub(super) fn command_read(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    // The start address may be negative (lead-in area)
    let start_address = cdb_get_u32(cdb, 2) as i32;
    let num_sectors = if cdb[0] == opcode::READ_10 {
        cdb_get_u16(cdb, 7) as i32
    } else {
        cdb_get_u32(cdb, 6) as i32
    };

    debug!(target: "opticd::mmc", start_address, num_sectors, "read request");

    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    let dcr = dev
        .mode_pages
        .get(0x01, PageView::Current)
        .map(error_recovery::dcr)
        .unwrap_or(false);

    {
        let disc = dev.disc.as_ref().unwrap();
        dev.delay.begin(
            disc,
            start_address,
            num_sectors,
            dev.options.dpm_emulation,
            dev.options.tr_emulation,
        );
    }

    for address in start_address..start_address + num_sectors {
        let mut sector = match dev.disc.as_mut().unwrap().get_sector(address) {
            Ok(sector) => sector,
            Err(e) => {
                debug!(target: "opticd::mmc", address, error = %e, "failed to read sector");
                dev.write_sense_full(
                    io,
                    sense_key::ILLEGAL_REQUEST,
                    asc_ascq::ILLEGAL_MODE_FOR_THIS_TRACK,
                    false,
                    address as u32,
                );
                return false;
            }
        };

        dev.flush_cache();

        // Bad-sector emulation: a sector whose EDC does not match its data
        // triggers a read error unless corrections are disabled
        if dev.options.bad_sector_emulation && !dcr {
            let sector_type = sector.sector_type();
            if (sector_type == SectorType::Mode1 || sector_type == SectorType::Mode2Form1)
                && !sector.verify_lec()
            {
                debug!(target: "opticd::mmc", address, "bad sector detected, triggering read error");
                dev.write_sense_full(
                    io,
                    sense_key::MEDIUM_ERROR,
                    asc_ascq::UNRECOVERED_READ_ERROR,
                    false,
                    address as u32,
                );
                return false;
            }
        }

        // READ supports only sectors with 2048 bytes of user data
        let data = sector.data();
        if data.len() != 2048 {
            debug!(
                target: "opticd::mmc",
                address,
                length = data.len(),
                "sector does not have 2048-byte user data"
            );
            dev.write_sense_full(
                io,
                sense_key::ILLEGAL_REQUEST,
                asc_ascq::ILLEGAL_MODE_FOR_THIS_TRACK,
                true,
                address as u32,
            );
            return false;
        }

        let staged = data.to_vec();
        dev.stage(&staged);
        dev.current_address = address;
        dev.write_buffer(io, staged.len());
    }

    dev.delay.finalize();
    true
}

/// READ CD and READ CD MSF
pub(super) fn command_read_cd(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    let (start_address, num_sectors);
    if cdb[0] == opcode::READ_CD {
        start_address = cdb_get_u32(cdb, 2) as i32;
        num_sectors = cdb_get_u24(cdb, 6) as i32;
    } else {
        start_address = msf_to_lba(cdb[3], cdb[4], cdb[5], true);
        let end_address = msf_to_lba(cdb[6], cdb[7], cdb[8], true);
        num_sectors = end_address - start_address;
    }

    let expected_type = match map_expected_sector_type((cdb[1] >> 2) & 0x07) {
        Ok(expected) => expected,
        Err(()) => {
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
            return false;
        }
    };
    let mcsb = cdb[9];
    let subchannel_mode = cdb[10] & 0x07;

    debug!(
        target: "opticd::mmc",
        start_address,
        num_sectors,
        expected_type = ?expected_type,
        mcsb,
        subchannel = subchannel_mode,
        "READ CD"
    );

    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    // Not supported on DVD media
    if dev.features.current_profile() == Profile::DvdRom {
        debug!(target: "opticd::mmc", "READ CD not supported on DVD media");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    // R-W de-interleaved subchannel is not supported; hosts probe this
    // with zero-length transfers
    if subchannel_mode == 0x04 {
        debug!(target: "opticd::mmc", "R-W subchannel reading not supported");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    // Probe the first sector to ensure the range starts on readable ground
    if let Err(e) = dev.disc.as_mut().unwrap().get_sector(start_address) {
        debug!(target: "opticd::mmc", error = %e, "failed to get start sector");
        dev.write_sense_full(
            io,
            sense_key::ILLEGAL_REQUEST,
            asc_ascq::ILLEGAL_MODE_FOR_THIS_TRACK,
            false,
            start_address as u32,
        );
        return false;
    }

    let dcr = dev
        .mode_pages
        .get(0x01, PageView::Current)
        .map(error_recovery::dcr)
        .unwrap_or(false);

    {
        let disc = dev.disc.as_ref().unwrap();
        dev.delay.begin(
            disc,
            start_address,
            num_sectors,
            dev.options.dpm_emulation,
            dev.options.tr_emulation,
        );
    }

    for address in start_address..start_address + num_sectors {
        let mut sector = match dev.disc.as_mut().unwrap().get_sector(address) {
            Ok(sector) => sector,
            Err(e) => {
                debug!(target: "opticd::mmc", address, error = %e, "failed to get sector");
                dev.write_sense_full(
                    io,
                    sense_key::ILLEGAL_REQUEST,
                    asc_ascq::ILLEGAL_MODE_FOR_THIS_TRACK,
                    false,
                    address as u32,
                );
                return false;
            }
        };

        dev.flush_cache();

        // Expected sector type must match when requested. Transitions
        // between the Mode 2 forms do not terminate the command.
        let sector_type = sector.sector_type();
        if let Some(expected) = expected_type {
            if sector_type != expected {
                debug!(
                    target: "opticd::mmc",
                    expected = ?expected,
                    got = ?sector_type,
                    "expected sector type mismatch"
                );
                dev.write_sense_full(
                    io,
                    sense_key::ILLEGAL_REQUEST,
                    asc_ascq::ILLEGAL_MODE_FOR_THIS_TRACK,
                    true,
                    address as u32,
                );
                return false;
            }
        }

        if dev.options.bad_sector_emulation && !dcr {
            if (sector_type == SectorType::Mode1 || sector_type == SectorType::Mode2Form1)
                && !sector.verify_lec()
            {
                debug!(target: "opticd::mmc", address, "bad sector detected, triggering read error");
                dev.write_sense_full(
                    io,
                    sense_key::MEDIUM_ERROR,
                    asc_ascq::UNRECOVERED_READ_ERROR,
                    false,
                    address as u32,
                );
                return false;
            }
        }

        let staged = read_sector_data(&mut sector, mcsb, subchannel_mode);
        debug!(target: "opticd::mmc", address, length = staged.len(), "sector read");
        dev.stage(&staged);
        dev.current_address = address;
        dev.write_buffer(io, staged.len());
    }

    dev.delay.finalize();
    true
}

/// READ CAPACITY
pub(super) fn command_read_capacity(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    _cdb: &[u8; 12],
) -> bool {
    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    // Capacity: last sector before the last session's lead-out
    let disc = dev.disc.as_ref().unwrap();
    let last_sector = disc
        .session_by_index(-1)
        .map(|session| session.leadout_start() - 1)
        .unwrap_or(0);

    let mut data = [0u8; 8];
    data[0..4].copy_from_slice(&(last_sector as u32).to_be_bytes());
    data[4..8].copy_from_slice(&2048u32.to_be_bytes());

    dev.stage(&data);
    dev.write_buffer(io, data.len());
    true
}

/// READ BUFFER CAPACITY
pub(super) fn command_read_buffer_capacity(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    let block = cdb[1] & 0x01 != 0;
    let capacity = KERNEL_IO_BUFFER_SIZE as u32;

    let mut data = [0u8; 12];
    data[0..2].copy_from_slice(&10u16.to_be_bytes());
    data[3] = block as u8;
    if block {
        data[8..12].copy_from_slice(&(capacity / 2048).to_be_bytes());
    } else {
        data[4..8].copy_from_slice(&capacity.to_be_bytes());
        data[8..12].copy_from_slice(&capacity.to_be_bytes());
    }

    dev.stage(&data);
    dev.write_buffer(io, data.len());
    true
}

/// SEEK (10): position is tracked per read, nothing to do
pub(super) fn command_seek(_dev: &mut Device, _io: &mut CommandIo<'_>, _cdb: &[u8; 12]) -> bool {
    debug!(target: "opticd::mmc", "seek: nothing to do");
    true
}
