//! Disc layout commands: READ TOC/PMA/ATIP, READ SUBCHANNEL,
//! READ DISC INFORMATION, READ TRACK INFORMATION, READ DISC STRUCTURE.

use tracing::debug;

use opticd_common::scsi::{asc_ascq, cdb_get_u16, cdb_get_u32, sense_key};

use super::super::disc_structures;
use super::super::features::Profile;
use super::super::kernel_io::CommandIo;
use super::super::Device;
use super::read_sector_data;
use crate::image::msf::{self, bcd_to_hex, lba_to_msf};
use crate::image::SectorType;

/// Append a (H)MSF or LBA address as a big-endian u32
fn push_address(data: &mut Vec<u8>, address: i32, time: bool) {
    if time {
        let (m, s, f) = lba_to_msf(address, true);
        data.extend_from_slice(&[0, m, s, f]);
    } else {
        data.extend_from_slice(&(address as u32).to_be_bytes());
    }
}

/// READ TOC/PMA/ATIP
pub(super) fn command_read_toc_pma_atip(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let time = cdb[1] & 0x02 != 0;
    let mut format = cdb[2] & 0x0F;
    let number = cdb[6];
    let allocation_len = cdb_get_u16(cdb, 7) as usize;
    let control = cdb[9];

    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    let is_dvdrom = dev.features.current_profile() == Profile::DvdRom;
    if is_dvdrom && format != 0x00 && format != 0x01 {
        debug!(target: "opticd::mmc", format, "invalid TOC format for DVD-ROM");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    // Ancient INF-8020 compatibility: hosts encode the format in the
    // control byte
    if format == 0 {
        if control == 0x40 {
            debug!(target: "opticd::mmc", "INF-8020 control byte mapping to format 0x01");
            format = 0x01;
        } else if control == 0x80 {
            debug!(target: "opticd::mmc", "INF-8020 control byte mapping to format 0x02");
            format = 0x02;
        }
    }

    let data = match format {
        0x00 => toc_formatted(dev, io, number, time),
        0x01 => toc_multisession(dev, io, time),
        0x02 => toc_raw(dev, io, number),
        0x04 => Some(toc_atip(dev)),
        0x05 => toc_cdtext(dev, io),
        other => {
            debug!(target: "opticd::mmc", format = other, "TOC format not supported");
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
            None
        }
    };

    let Some(data) = data else {
        return false;
    };

    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}

/// Format 0x00: formatted TOC
fn toc_formatted(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    number: u8,
    time: bool,
) -> Option<Vec<u8>> {
    let disc = dev.disc.as_ref().unwrap();

    let Some(last_track) = disc.track_by_index(-1) else {
        debug!(target: "opticd::mmc", "no track found on disc");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return None;
    };
    let last_track_number = last_track.number();

    if number != 0xAA && number as i32 > last_track_number {
        debug!(
            target: "opticd::mmc",
            number,
            last = last_track_number,
            "starting track exceeds last track"
        );
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return None;
    }

    let mut data = vec![0u8; 4];

    // Track descriptors, lead-out excluded when a specific start is given
    if number != 0xAA {
        for session in disc.sessions() {
            for track in session.tracks() {
                if track.number() < number as i32 {
                    continue;
                }
                data.push(0);
                data.push((track.adr() << 4) | track.ctl());
                data.push(track.number() as u8);
                data.push(0);
                push_address(&mut data, track.start_sector() + track.track_start(), time);
            }
        }
    }

    // Lead-out of the last session as track 0xAA
    let last_session = disc.session_by_index(-1).unwrap();
    data.push(0);
    data.push(0x10);
    data.push(0xAA);
    data.push(0);
    push_address(&mut data, last_session.leadout_start(), time);

    let length = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&length.to_be_bytes());
    data[2] = 0x01;
    data[3] = last_track_number as u8;
    Some(data)
}

/// Format 0x01: multisession information
fn toc_multisession(dev: &mut Device, io: &mut CommandIo<'_>, time: bool) -> Option<Vec<u8>> {
    let disc = dev.disc.as_ref().unwrap();

    let Some(last_session) = disc.session_by_index(-1) else {
        debug!(target: "opticd::mmc", "no session found on disc");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return None;
    };
    let Some(first_track) = last_session.track_by_index(0) else {
        debug!(target: "opticd::mmc", "no track in last session");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return None;
    };

    let mut data = vec![0u8; 4];
    data[2] = 0x01;
    data[3] = last_session.session_number() as u8;

    data.push(0);
    data.push((first_track.adr() << 4) | first_track.ctl());
    data.push(first_track.number() as u8);
    data.push(0);
    push_address(&mut data, first_track.start_sector() + first_track.track_start(), time);

    let length = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&length.to_be_bytes());
    Some(data)
}

fn raw_toc_descriptor(
    session_number: u8,
    adr_ctl: u8,
    point: u8,
    msf: (u8, u8, u8),
    zero: u8,
    pmsf: (u8, u8, u8),
) -> [u8; 11] {
    [
        session_number,
        adr_ctl,
        0,
        point,
        msf.0,
        msf.1,
        msf.2,
        zero,
        pmsf.0,
        pmsf.1,
        pmsf.2,
    ]
}

/// Format 0x02: raw TOC
fn toc_raw(dev: &mut Device, io: &mut CommandIo<'_>, number: u8) -> Option<Vec<u8>> {
    let disc = dev.disc.as_ref().unwrap();
    let num_sessions = disc.number_of_sessions();

    let Some(last_session) = disc.session_by_index(-1) else {
        debug!(target: "opticd::mmc", "no session found on disc");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return None;
    };
    let last_session_number = last_session.session_number();

    let mut data = vec![0u8; 4];

    for session in disc.sessions() {
        let session_number = session.session_number();
        if session_number < number as i32 {
            continue;
        }
        let sn = session_number as u8;

        let (Some(first_track), Some(last_track)) =
            (session.track_by_index(0), session.track_by_index(-1))
        else {
            continue;
        };

        // A0: first track number and session type
        data.extend_from_slice(&raw_toc_descriptor(
            sn,
            (first_track.adr() << 4) | first_track.ctl(),
            0xA0,
            (0, 0, 0),
            0,
            (first_track.number() as u8, session.session_type().disc_type_byte(), 0),
        ));

        // A1: last track number
        data.extend_from_slice(&raw_toc_descriptor(
            sn,
            (last_track.adr() << 4) | last_track.ctl(),
            0xA1,
            (0, 0, 0),
            0,
            (last_track.number() as u8, 0, 0),
        ));

        // A2: lead-out start
        let leadout_start = session.leadout_start();
        data.extend_from_slice(&raw_toc_descriptor(
            sn,
            0x10,
            0xA2,
            (0, 0, 0),
            0,
            lba_to_msf(leadout_start, true),
        ));

        // One descriptor per track
        for track in session.tracks() {
            data.extend_from_slice(&raw_toc_descriptor(
                sn,
                (track.adr() << 4) | track.ctl(),
                track.number() as u8,
                (0, 0, 0),
                0,
                lba_to_msf(track.start_sector() + track.track_start(), true),
            ));
        }

        // Multisession discs carry B0 (and C0 for the first session)
        // mode-5 descriptors
        if num_sessions > 1 {
            debug!(target: "opticd::mmc", session = session_number, "emitting B0 descriptor");

            let b0_msf = if session_number < last_session_number {
                lba_to_msf(leadout_start + session.leadout_length(), true)
            } else {
                // Last session: disc is closed
                (0xFF, 0xFF, 0xFF)
            };
            let mode5_entries = if session_number == 1 { 2 } else { 1 };

            // The PMIN/PSEC/PFRAME pattern marks the maximum capacity of
            // an 80-minute disc
            data.extend_from_slice(&raw_toc_descriptor(
                sn,
                0x50,
                0xB0,
                b0_msf,
                mode5_entries,
                (0x4F, 0x3B, 0x47),
            ));

            if session_number == 1 {
                debug!(target: "opticd::mmc", "emitting C0 descriptor");
                data.extend_from_slice(&raw_toc_descriptor(
                    sn,
                    0x50,
                    0xC0,
                    (0, 0, 0),
                    0,
                    (0x95, 0x00, 0x00),
                ));
            }
        }
    }

    let length = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&length.to_be_bytes());
    data[2] = 0x01;
    data[3] = last_session_number as u8;
    Some(data)
}

/// Format 0x04: ATIP, fabricated for recordable media only
fn toc_atip(dev: &mut Device) -> Vec<u8> {
    let mut data = vec![0u8; 4];

    if dev.recordable_disc {
        let mut descriptor = [0u8; 24];
        descriptor[0] = 0xC4; // valid bit, indicative target writing power
        descriptor[2] = 0x80
            | ((dev.rewritable_disc as u8) << 6) // disc type: CD-R / CD-RW
            | (0x3 << 3); // disc subtype
        // Lead-in start, as observed on a real CD-R
        descriptor[4] = 0x61;
        descriptor[5] = 0x22;
        descriptor[6] = 0x17;
        // Last possible lead-out follows the medium capacity
        let (m, s, f) = lba_to_msf(dev.medium_capacity - 2, false);
        descriptor[8] = m;
        descriptor[9] = s;
        descriptor[10] = f;
        data.extend_from_slice(&descriptor);
    }

    let length = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&length.to_be_bytes());
    data
}

/// Format 0x05: CD-TEXT from the first session
fn toc_cdtext(dev: &mut Device, io: &mut CommandIo<'_>) -> Option<Vec<u8>> {
    let disc = dev.disc.as_ref().unwrap();
    let Some(session) = disc.session_by_index(0) else {
        debug!(target: "opticd::mmc", "no session found on disc");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return None;
    };

    let mut data = vec![0u8; 4];
    if let Some(cdtext) = session.cdtext_data() {
        debug!(target: "opticd::mmc", length = cdtext.len(), "CD-TEXT data");
        data.extend_from_slice(cdtext);
    } else {
        debug!(target: "opticd::mmc", "no CD-TEXT data");
    }

    let length = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&length.to_be_bytes());
    Some(data)
}

/// Read the 12 significant Q bytes of a sector
fn read_q(dev: &mut Device, address: i32) -> Option<[u8; 12]> {
    let mut sector = dev.disc.as_mut()?.get_sector(address).ok()?;
    let raw = read_sector_data(&mut sector, 0x00, 0x02);
    let mut q = [0u8; 12];
    q.copy_from_slice(&raw[..12]);
    Some(q)
}

/// READ SUBCHANNEL
pub(super) fn command_read_subchannel(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let time = cdb[1] & 0x02 != 0;
    let subq = cdb[2] & 0x40 != 0;
    let param_list = cdb[3];
    let track_number = cdb[6];
    let allocation_len = cdb_get_u16(cdb, 7) as usize;

    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    let mut data = vec![0u8; 4];

    if subq {
        match param_list {
            0x01 => {
                // Current position, from the Q subchannel under the head
                let current_address = dev.current_address;
                debug!(target: "opticd::mmc", current_address, "current position");

                let Some(mut q) = read_q(dev, current_address) else {
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
                    return false;
                };

                // A non-position Q (MCN/ISRC) is interpolated from the
                // next position sector
                let mut correction = 0i32;
                while q[0] & 0x0F != 0x01 {
                    correction += 1;
                    debug!(
                        target: "opticd::mmc",
                        address = current_address + correction,
                        "skipping non-position Q"
                    );
                    match read_q(dev, current_address + correction) {
                        Some(next) => q = next,
                        None => break,
                    }
                }

                // Relative comes first in Q, absolute in the response;
                // values are converted to HEX (hosts rely on it)
                let mut relative =
                    msf::msf_to_lba(bcd_to_hex(q[3]), bcd_to_hex(q[4]), bcd_to_hex(q[5]), false);
                let mut absolute =
                    msf::msf_to_lba(bcd_to_hex(q[7]), bcd_to_hex(q[8]), bcd_to_hex(q[9]), true);
                relative -= correction;
                absolute -= correction;

                data.push(0x01);
                data.push(((q[0] & 0x0F) << 4) | (q[0] >> 4));
                data.push(bcd_to_hex(q[1]));
                data.push(bcd_to_hex(q[2]));
                if time {
                    let (m, s, f) = lba_to_msf(absolute, true);
                    data.extend_from_slice(&[0, m, s, f]);
                    let (m, s, f) = lba_to_msf(relative, false);
                    data.extend_from_slice(&[0, m, s, f]);
                } else {
                    data.extend_from_slice(&(absolute as u32).to_be_bytes());
                    data.extend_from_slice(&(relative as u32).to_be_bytes());
                }
            }
            0x02 => {
                // MCN lives in the first hundred sectors
                debug!(target: "opticd::mmc", "MCN/UPC/EAN");
                let mut payload = [0u8; 20];
                payload[0] = 0x02;

                for address in 0..100 {
                    let Some(q) = read_q(dev, address) else {
                        continue;
                    };
                    if q[0] & 0x0F == 0x02 {
                        let mcn = msf::q_decode_mcn(&q[1..10]);
                        debug!(target: "opticd::mmc", address, mcn = %mcn, "found MCN");
                        payload[4] = 0x80; // MCVAL
                        payload[5..18].copy_from_slice(mcn.as_bytes());
                        break;
                    }
                }
                data.extend_from_slice(&payload);
            }
            0x03 => {
                // ISRC lives in the first hundred sectors of the track
                debug!(target: "opticd::mmc", track_number, "ISRC");
                let Some(track_start) = dev
                    .disc
                    .as_ref()
                    .unwrap()
                    .track_by_number(track_number as i32)
                    .map(|t| t.start_sector())
                else {
                    debug!(target: "opticd::mmc", track_number, "failed to get track");
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
                    return false;
                };

                let mut payload = [0u8; 20];
                payload[0] = 0x03;

                for offset in 0..100 {
                    let Some(q) = read_q(dev, track_start + offset) else {
                        continue;
                    };
                    if q[0] & 0x0F == 0x03 {
                        let isrc = msf::q_decode_isrc(&q[1..10]);
                        debug!(target: "opticd::mmc", isrc = %isrc, "found ISRC");
                        payload[1] = ((q[0] & 0x0F) << 4) | (q[0] >> 4);
                        payload[2] = q[1];
                        payload[4] = 0x80; // TCVAL
                        payload[5..17].copy_from_slice(isrc.as_bytes());
                        break;
                    }
                }
                data.extend_from_slice(&payload);
            }
            other => {
                debug!(target: "opticd::mmc", param_list = other, "unknown subchannel parameter list");
            }
        }
    }

    data[1] = dev.audio.status();
    let length = (data.len() - 4) as u16;
    data[2..4].copy_from_slice(&length.to_be_bytes());

    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}

/// READ DISC INFORMATION
pub(super) fn command_read_disc_information(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let data_type = cdb[1] & 0x07;
    let allocation_len = cdb_get_u16(cdb, 7) as usize;

    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    if data_type != 0x00 {
        debug!(target: "opticd::mmc", data_type, "disc information type not supported");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    debug!(target: "opticd::mmc", "standard disc information");

    let disc = dev.disc.as_ref().unwrap();

    // Unless the disc is closed there is an additional incomplete or empty
    // session
    let mut num_sessions = disc.number_of_sessions();
    if !dev.disc_closed {
        num_sessions += 1;
    }

    // Disc type comes from the first session
    let disc_type = disc
        .session_by_index(0)
        .map(|s| s.session_type().disc_type_byte())
        .unwrap_or(0xFF);

    // Last session: the open one on a recordable disc in progress
    let last_session = if dev.recordable_disc && !dev.disc_closed {
        dev.open_session.and_then(|idx| disc.session(idx))
    } else {
        disc.session_by_index(-1)
    };

    let last_session_state: u8 = if dev.recordable_disc && !dev.disc_closed {
        if dev.open_session.is_none() {
            0x00 // empty
        } else {
            0x01 // incomplete
        }
    } else {
        0x03 // complete
    };

    let mut first_track_last_session = 1;
    let mut last_track_last_session = 1;
    if let Some(session) = last_session {
        if let Some(track) = session.track_by_index(0) {
            first_track_last_session = track.number();
        }
        if let Some(track) = session.track_by_index(-1) {
            last_track_last_session = track.number();
        }
    }

    let disc_status: u8 = if dev.recordable_disc {
        if dev.disc_closed {
            0x02 // complete
        } else if disc.number_of_sessions() == 0 && dev.open_session.is_none() {
            0x00 // empty
        } else {
            0x01 // incomplete
        }
    } else {
        0x02 // complete
    };

    let mut data = vec![0u8; 34];
    data[2] = ((dev.rewritable_disc as u8) << 4) | (last_session_state << 2) | disc_status;
    data[3] = 0x01; // first track on disc
    data[4] = num_sessions as u8;
    data[5] = first_track_last_session as u8;
    data[6] = last_track_last_session as u8;
    data[8] = disc_type;
    data[9] = (num_sessions >> 8) as u8;
    data[10] = (first_track_last_session >> 8) as u8;
    data[11] = (last_track_last_session >> 8) as u8;

    // Last session lead-in and last possible lead-out, MSF or 0xFFFFFFFF
    if !dev.recordable_disc || dev.disc_closed {
        data[16..20].fill(0xFF);
        data[20..24].fill(0xFF);
    } else {
        let (m, s, f) = lba_to_msf(dev.medium_leadin, true);
        data[17] = m;
        data[18] = s;
        data[19] = f;
        let (m, s, f) = lba_to_msf(dev.medium_capacity - 2, false);
        data[21] = m;
        data[22] = s;
        data[23] = f;
    }

    let length = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&length.to_be_bytes());

    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}

/// READ TRACK INFORMATION
pub(super) fn command_read_track_information(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let address_type = cdb[1] & 0x03;
    let number = cdb_get_u32(cdb, 2) as i32;
    let allocation_len = cdb_get_u16(cdb, 7) as usize;

    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    let disc = dev.disc.as_ref().unwrap();
    let total_tracks = disc.number_of_tracks() as i32;

    let mut found = None;
    let mut return_empty_track = false;
    let mut return_disc_leadin = false;

    match address_type {
        0x00 => {
            debug!(target: "opticd::mmc", number, "track containing sector");
            found = disc.track_by_address(number);
            if found.is_none() && dev.recordable_disc {
                return_empty_track = true;
            }
        }
        0x01 => {
            debug!(target: "opticd::mmc", number, "track by number");
            if number >= 1 && number <= total_tracks {
                found = disc.track_by_number(number);
            } else if number == total_tracks + 1 && dev.recordable_disc {
                // Next empty track
                return_empty_track = true;
            } else if number == 0x00 && dev.recordable_disc {
                // Disc lead-in
                return_disc_leadin = true;
            } else if number == 0xFF && dev.recordable_disc {
                // Invisible/incomplete track
                return_empty_track = true;
            }
        }
        0x02 => {
            debug!(target: "opticd::mmc", number, "first track in session");
            found = disc
                .session_by_number(number)
                .and_then(|session| session.track_by_index(0));
        }
        _ => {}
    }

    let mut track_number = 0i32;
    let mut session_number = 0i32;
    let mut track_mode = 0u8;
    let mut data_mode = 0u8;
    let mut start_sector = 0i32;
    let mut next_writable_address = 0u32;
    let mut free_blocks = 0u32;
    let mut length = 0i32;
    let mut nwa_valid = false;
    let mut blank_track = false;

    if let Some(track) = found {
        track_number = track.number();
        session_number = track.session_number();
        track_mode = track.ctl();
        data_mode = match track.sector_type() {
            SectorType::Audio | SectorType::Mode1 => 0x01,
            SectorType::Mode2
            | SectorType::Mode2Form1
            | SectorType::Mode2Form2
            | SectorType::Mode2Mixed => 0x02,
            _ => 0x0F,
        };
        start_sector = track.start_sector();
        length = track.length();
    } else if return_empty_track {
        track_number = total_tracks + 1;
        session_number = disc.number_of_sessions() as i32 + 1;
        data_mode = 0x01;
        track_mode = 0x07;
        free_blocks = (dev.medium_capacity - 150) as u32;
        length = dev.medium_capacity - 150;
        blank_track = true;

        if let Some(recording) = dev.recording {
            nwa_valid = true;
            next_writable_address = recording.next_writable_address(dev) as u32;
        }
    } else if return_disc_leadin {
        start_sector = dev.medium_leadin;
    } else {
        debug!(target: "opticd::mmc", "couldn't find track");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    let mut data = vec![0u8; 48];
    data[2] = track_number as u8;
    data[3] = session_number as u8;
    data[5] = track_mode & 0x0F;
    data[6] = ((blank_track as u8) << 6) | (data_mode & 0x0F);
    data[7] = nwa_valid as u8;
    data[8..12].copy_from_slice(&(start_sector as u32).to_be_bytes());
    data[12..16].copy_from_slice(&next_writable_address.to_be_bytes());
    data[16..20].copy_from_slice(&free_blocks.to_be_bytes());
    data[24..28].copy_from_slice(&(length as u32).to_be_bytes());
    data[32] = (track_number >> 8) as u8;
    data[33] = (session_number >> 8) as u8;

    let total = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&total.to_be_bytes());

    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}

/// READ DISC STRUCTURE
pub(super) fn command_read_disc_structure(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let media_type = cdb[1] & 0x0F;
    let layer = cdb[6];
    let format = cdb[7];
    let allocation_len = cdb_get_u16(cdb, 8) as usize;

    if !dev.loaded() {
        dev.write_sense(io, sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        return false;
    }

    let profile = dev.features.current_profile();
    let type_matches = match media_type {
        0x00 => profile.is_dvd(),
        0x01 => profile.is_bd(),
        _ => false,
    };
    if !type_matches {
        debug!(target: "opticd::mmc", media_type, profile = ?profile, "disc structure media type mismatch");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    debug!(target: "opticd::mmc", format, layer, "requested disc structure");

    // Prefer a structure supplied by the image; fabricate otherwise
    let disc = dev.disc.as_ref().unwrap();
    let structure = disc
        .disc_structure(layer, format)
        .map(|s| s.to_vec())
        .or_else(|| {
            disc_structures::generate(
                profile,
                format,
                disc.layout_length(),
                dev.options.dvd_report_css,
            )
        });

    let Some(structure) = structure else {
        debug!(
            target: "opticd::mmc",
            format, layer,
            "structure not provided by image and cannot be fabricated"
        );
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    };

    let mut data = vec![0u8; 4];
    data.extend_from_slice(&structure);
    let length = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&length.to_be_bytes());

    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}
