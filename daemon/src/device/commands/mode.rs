//! Parameter and status commands: MODE SENSE/SELECT, GET CONFIGURATION,
//! GET EVENT/STATUS NOTIFICATION, GET PERFORMANCE, INQUIRY, REQUEST SENSE,
//! REPORT KEY, SET CD SPEED, SET STREAMING.

use tracing::debug;

use opticd_common::scsi::{asc_ascq, cdb_get_u16, opcode, sense_key, SenseData};

use super::super::features::{Profile, WriteSpeedDescriptor};
use super::super::kernel_io::CommandIo;
use super::super::mode_pages::{capabilities, PageView};
use super::super::{Device, MediaEvent};
use crate::image::MediumType;

/// MODE SELECT (6) and (10)
pub(super) fn command_mode_select(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    let transfer_len = if cdb[0] == opcode::MODE_SELECT_6 {
        cdb[4] as usize
    } else {
        cdb_get_u16(cdb, 7) as usize
    };

    dev.read_buffer(io, transfer_len);

    // Locate the page payload behind the parameter list header and any
    // block descriptors
    let (blkdesc_len, offset) = if cdb[0] == opcode::MODE_SELECT_6 {
        let blkdesc = *dev.cache.get(3).unwrap_or(&0) as usize;
        (blkdesc, 4 + blkdesc)
    } else {
        let blkdesc = if dev.cache_size >= 8 {
            u16::from_be_bytes([dev.cache[6], dev.cache[7]]) as usize
        } else {
            0
        };
        (blkdesc, 8 + blkdesc)
    };

    // ATAPI devices carry no block descriptors
    if blkdesc_len != 0 {
        debug!(target: "opticd::mmc", blkdesc_len, "block descriptor provided");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
        return false;
    }

    if transfer_len > offset {
        let raw = dev.cache[offset..transfer_len].to_vec();
        debug!(
            target: "opticd::mmc",
            page = raw[0] & 0x3F,
            bytes = raw.len(),
            "modifying mode page"
        );
        if !dev.mode_pages.modify(&raw) {
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
            return false;
        }
    }

    true
}

/// MODE SENSE (6) and (10)
pub(super) fn command_mode_sense(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    let pc = cdb[2] >> 6;
    let page_code = cdb[2] & 0x3F;
    let (transfer_len, header_size) = if cdb[0] == opcode::MODE_SENSE_6 {
        (cdb[4] as usize, 4usize)
    } else {
        (cdb_get_u16(cdb, 7) as usize, 8usize)
    };

    // Saved values are not supported
    if pc == 0x03 {
        debug!(target: "opticd::mmc", "saved mode page values requested");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::SAVING_PARAMETERS_NOT_SUPPORTED);
        return false;
    }

    let view = match pc {
        0x01 => PageView::Changeable,
        0x02 => PageView::Default,
        _ => PageView::Current,
    };

    let mut data = vec![0u8; header_size];
    let mut page_found = false;

    for page in dev.mode_pages.iter(view) {
        if page_code == 0x3F || page_code == page[0] & 0x3F {
            data.extend_from_slice(page);
            if page_code != 0x3F {
                page_found = true;
                break;
            }
        }
    }

    if page_code != 0x3F && !page_found {
        debug!(target: "opticd::mmc", page_code, "mode page not found");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    // Parameter list header: mode data length excludes its own field
    if cdb[0] == opcode::MODE_SENSE_6 {
        data[0] = (data.len() - 1) as u8;
    } else {
        let length = (data.len() - 2) as u16;
        data[0..2].copy_from_slice(&length.to_be_bytes());
    }

    dev.stage(&data);
    dev.write_buffer(io, transfer_len);
    true
}

/// GET CONFIGURATION
pub(super) fn command_get_configuration(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let rt = cdb[1] & 0x03;
    let starting_feature = cdb_get_u16(cdb, 2);
    let allocation_len = cdb_get_u16(cdb, 7) as usize;

    debug!(
        target: "opticd::mmc",
        rt,
        "requesting features from {starting_feature:#06x} on"
    );

    let mut data = vec![0u8; 8];

    // Features are sorted, so a plain >= scan serves all three RT values
    for feature in dev.features.features() {
        if feature.code < starting_feature {
            continue;
        }
        let wanted = match rt {
            0x00 => true,
            0x01 => feature.current,
            0x02 => feature.code == starting_feature,
            _ => false,
        };
        if wanted {
            debug!(target: "opticd::mmc", "copying feature {:#06x}", feature.code);
            data.extend_from_slice(&feature.serialize());
            if rt == 0x02 {
                break;
            }
        }
    }

    // Header: data length excludes its own field; current profile follows
    let length = (data.len() - 4) as u32;
    data[0..4].copy_from_slice(&length.to_be_bytes());
    data[6..8].copy_from_slice(&dev.features.current_profile().code().to_be_bytes());

    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}

/// GET EVENT/STATUS NOTIFICATION
pub(super) fn command_get_event_status_notification(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let immed = cdb[1] & 0x01 != 0;
    let request = cdb[4];
    let allocation_len = cdb_get_u16(cdb, 7) as usize;

    if !immed {
        debug!(target: "opticd::mmc", "asynchronous event notification not supported");
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    // Header: length, NEA/notification class, supported classes (media)
    let mut data = vec![0u8; 4];
    data[2] = 0x80; // NEA until a supported class is requested
    data[3] = 0x10; // media event class supported

    if request & 0x10 != 0 {
        data[2] = 0x04; // media notification class
        debug!(
            target: "opticd::mmc",
            event = ?dev.media_event,
            "reporting media event"
        );

        let mut descriptor = [0u8; 4];
        descriptor[0] = dev.media_event as u8;
        descriptor[1] = if dev.loaded() { 0x02 } else { 0x00 };
        data.extend_from_slice(&descriptor);

        dev.media_event = MediaEvent::NoChange;
    }

    let length = (data.len() - 2) as u16;
    data[0..2].copy_from_slice(&length.to_be_bytes());

    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}

/// GET PERFORMANCE type 0x00 descriptors: (start lba, start performance,
/// end lba, end performance)
fn performance_descriptors(dev: &Device, write: bool) -> Vec<[u32; 4]> {
    let Some(disc) = dev.disc.as_ref() else {
        // No disc: a single nominal descriptor
        return if write {
            vec![[0, 0x5690, 0, 0x5690]]
        } else {
            vec![[0, 0x2383, 0, 0x5690]]
        };
    };

    let end = if dev.recordable_disc {
        dev.medium_capacity as u32
    } else {
        disc.layout_length() as u32
    };

    if write {
        if !dev.recordable_disc {
            return Vec::new();
        }
        match disc.medium_type() {
            MediumType::Cd => vec![
                [0, 0x0B4E, 0x0004B0BA, 0x1B90],
                [0x0004B0BA, 0x1B90, end, 0x1B90],
            ],
            MediumType::Dvd => vec![[0, 0x15A4, end, 0x15A4]],
            MediumType::Bd => vec![[0, 0x231E, end, 0x231E]],
        }
    } else {
        match disc.medium_type() {
            MediumType::Cd => vec![[0, 0x0B4E, end, 0x1B90]],
            MediumType::Dvd => vec![[0, 0x1AA2, end, 0x40EC]],
            MediumType::Bd => vec![[0, 0x39A0, end, 0x8C78]],
        }
    }
}

/// GET PERFORMANCE
pub(super) fn command_get_performance(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let except = cdb[1] & 0x03;
    let write = cdb[1] & 0x04 != 0;
    let tolerance = (cdb[1] >> 3) & 0x03;
    let max_descriptors = cdb_get_u16(cdb, 8) as usize;
    let data_type = cdb[10];

    match data_type {
        0x00 => {
            // Performance data
            if tolerance != 2 {
                debug!(target: "opticd::mmc", tolerance, "tolerance field is not 10b");
                dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
                return false;
            }

            let mut data = vec![0u8; 8];
            data[4] = ((write as u8) << 1) | except;

            // Exception data has no descriptors
            if except == 0 {
                let descriptors = performance_descriptors(dev, write);
                for descriptor in descriptors.iter().take(max_descriptors) {
                    for value in descriptor {
                        data.extend_from_slice(&value.to_be_bytes());
                    }
                }
            }

            let length = (data.len() - 4) as u32;
            data[0..4].copy_from_slice(&length.to_be_bytes());

            dev.stage(&data);
            let staged = data.len();
            dev.write_buffer(io, staged);
        }
        0x03 => {
            // Write speed descriptors
            debug!(target: "opticd::mmc", max_descriptors, "returning write speed descriptors");
            let descriptors: Vec<WriteSpeedDescriptor> =
                dev.features.write_descriptors().to_vec();

            let mut data = vec![0u8; 8];
            for descriptor in descriptors.iter().take(max_descriptors) {
                data.extend_from_slice(&descriptor.to_bytes());
            }

            // The length field counts all available descriptors even when
            // fewer are returned
            let length =
                4 + descriptors.len() * WriteSpeedDescriptor::SIZE;
            data[0..4].copy_from_slice(&(length as u32).to_be_bytes());

            dev.stage(&data);
            let staged = data.len();
            dev.write_buffer(io, staged);
        }
        other => {
            debug!(target: "opticd::mmc", data_type = other, "unimplemented performance type");
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
            return false;
        }
    }

    true
}

/// INQUIRY, standard data and the VPD pages 0x00 / 0x80 / 0x83
pub(super) fn command_inquiry(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    let evpd = cdb[1] & 0x01 != 0;
    let page_code = cdb[2];
    let allocation_len = cdb_get_u16(cdb, 3) as usize;

    debug!(target: "opticd::mmc", evpd, page_code, "INQUIRY");

    // Non-zero page code without EVPD is illegal
    if !evpd && page_code != 0 {
        dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
        return false;
    }

    if evpd {
        return command_inquiry_vpd(dev, io, page_code, allocation_len);
    }

    let mut data = vec![0u8; 96];
    data[0] = 0x05; // CD-ROM device
    data[1] = 0x80; // removable medium
    data[2] = 0x00;
    data[3] = 0x32; // ATAPI version 3, response format 2
    data[4] = (data.len() - 5) as u8;

    copy_padded(&mut data[8..16], dev.id.vendor.as_bytes());
    copy_padded(&mut data[16..32], dev.id.product.as_bytes());
    copy_padded(&mut data[32..36], dev.id.revision.as_bytes());
    copy_padded(&mut data[36..56], dev.id.vendor_specific.as_bytes());

    // Version descriptor: MMC-3
    data[58..60].copy_from_slice(&0x02A0u16.to_be_bytes());

    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}

fn command_inquiry_vpd(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    page_code: u8,
    allocation_len: usize,
) -> bool {
    let mut data = vec![0x05u8, page_code, 0, 0];

    match page_code {
        0x00 => {
            // Supported VPD pages
            data.extend_from_slice(&[0x00, 0x80, 0x83]);
        }
        0x80 => {
            // Unit serial number
            data.extend_from_slice(dev.serial.as_bytes());
        }
        0x83 => {
            // Device identification: T-10 vendor ID based ASCII descriptor
            let mut identifier = Vec::new();
            let mut vendor = [0x20u8; 8];
            copy_padded(&mut vendor, dev.id.vendor.as_bytes());
            identifier.extend_from_slice(&vendor);
            identifier
                .extend_from_slice(format!("{} {}", dev.id.product, dev.serial).as_bytes());

            data.push(0x82); // protocol ATAPI, code set ASCII
            data.push(0x01); // LUN association, T-10 vendor ID based
            data.push(0x00);
            data.push(identifier.len() as u8);
            data.extend_from_slice(&identifier);
        }
        other => {
            debug!(target: "opticd::mmc", page = other, "VPD page not implemented");
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
            return false;
        }
    }

    data[3] = (data.len() - 4) as u8;
    dev.stage(&data);
    dev.write_buffer(io, allocation_len);
    true
}

fn copy_padded(dest: &mut [u8], src: &[u8]) {
    dest.fill(b' ');
    let len = src.len().min(dest.len());
    dest[..len].copy_from_slice(&src[..len]);
}

/// REQUEST SENSE: no deferred errors are generated, so the reply is an
/// empty sense whose qualifier carries the audio status
pub(super) fn command_request_sense(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    debug!(target: "opticd::mmc", "returning sense data");
    let sense = SenseData::no_sense(dev.audio.status());
    dev.stage(&sense.to_bytes());
    dev.write_buffer(io, cdb[4] as usize);
    true
}

/// REPORT KEY; only the RPC key format is implemented
pub(super) fn command_report_key(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    let key_format = cdb[10] & 0x3F;
    let allocation_len = cdb_get_u16(cdb, 8) as usize;

    if key_format == 0x08 {
        // RPC phase: no region setting, 4 vendor resets, 5 user changes
        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&6u16.to_be_bytes());
        data[4] = (4 << 3) | 5;
        data[5] = 0xFF; // region mask
        data[6] = 0x01; // RPC scheme

        dev.stage(&data);
        dev.write_buffer(io, allocation_len);
        return true;
    }

    if dev.features.current_profile() != Profile::DvdRom {
        debug!(target: "opticd::mmc", "REPORT KEY not supported on non-DVD media");
        dev.write_sense(
            io,
            sense_key::ILLEGAL_REQUEST,
            asc_ascq::CANNOT_READ_MEDIUM_INCOMPATIBLE_FORMAT,
        );
        return false;
    }

    debug!(target: "opticd::mmc", key_format, "key format not implemented");
    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_CDB);
    false
}

/// SET CD SPEED: record the selection in the capabilities page
pub(super) fn command_set_cd_speed(dev: &mut Device, io: &mut CommandIo<'_>, cdb: &[u8; 12]) -> bool {
    let read_speed = cdb_get_u16(cdb, 2);
    let write_speed = cdb_get_u16(cdb, 4);
    let _ = io;

    let Some(page) = dev.mode_pages.get_current_mut(0x2A) else {
        return true;
    };

    if read_speed == 0xFFFF {
        debug!(target: "opticd::mmc", "setting read speed to max");
        let max = capabilities::max_read_speed(page);
        capabilities::set_cur_read_speed(page, max);
    } else {
        debug!(target: "opticd::mmc", read_speed, "setting read speed");
        capabilities::set_cur_read_speed(page, read_speed);
    }

    if write_speed == 0xFFFF {
        debug!(target: "opticd::mmc", "setting write speed to max");
        let max = capabilities::max_write_speed(page);
        capabilities::set_cur_write_speed(page, max);
    } else {
        debug!(target: "opticd::mmc", write_speed, "setting write speed");
        capabilities::set_cur_write_speed(page, write_speed);
    }

    true
}

/// SET STREAMING: accept and log the descriptor
pub(super) fn command_set_streaming(
    dev: &mut Device,
    io: &mut CommandIo<'_>,
    cdb: &[u8; 12],
) -> bool {
    let descriptor_type = cdb[8];
    let length = cdb_get_u16(cdb, 9) as usize;

    debug!(target: "opticd::mmc", descriptor_type, length, "streaming descriptor");
    dev.read_buffer(io, length);
    true
}
