//! Recording engine: track-at-once, session-at-once (cooked and raw),
//! raw, and DVD/BD disc-at-once strategies.
//!
//! All strategies share one open/close protocol: at most one session is
//! open, at most one track inside it. Host writes arrive through the
//! command cache; each strategy translates them into sectors appended to
//! the open track. Closing a session flushes queued lead-in CD-TEXT packs
//! and, when the write parameters page disallows multisession, finalizes
//! the image.

use tracing::{debug, warn};

use opticd_common::scsi::{asc_ascq, sense_key};

use super::kernel_io::CommandIo;
use super::mode_pages::{write_params, PageView};
use super::Device;
use crate::image::disc::{Fragment, FragmentData, Track};
use crate::image::msf::{self, bcd_to_hex};
use crate::image::sector::Sector;
use crate::image::{
    FragmentRole, IgnoreFields, MediumType, SectorType, Session, SessionType, SubchannelFormat,
};

/// One recording strategy; selected by the recording mode switch
pub trait RecordingStrategy: Sync {
    /// Pull `count` sectors from the inbound buffer and append them
    fn write_sectors(
        &self,
        dev: &mut Device,
        io: &mut CommandIo<'_>,
        start_address: i32,
        count: i32,
    ) -> bool;

    /// Drop the reference to the open track
    fn close_track(&self, dev: &mut Device) -> bool {
        recording_close_track(dev)
    }

    /// Close the open session
    fn close_session(&self, dev: &mut Device) -> bool {
        recording_close_session(dev)
    }

    /// Next writable address under this strategy
    fn next_writable_address(&self, dev: &Device) -> i32;

    /// Pre-allocate a track; a no-op in modes that do not reserve
    fn reserve_track(&self, dev: &mut Device, length: u32) -> bool {
        let _ = (dev, length);
        true
    }
}

pub static TAO_RECORDING: TaoRecording = TaoRecording;
pub static SAO_RECORDING: SaoRecording = SaoRecording;
pub static RAW_RECORDING: RawRecording = RawRecording;
pub static DAO_RECORDING: DaoRecording = DaoRecording;

/// Activate a recording mode: 1 = TAO, 2 = SAO (CD) / DAO (DVD, BD),
/// 3 = RAW. Unknown values reset to TAO. Mode page 0x05 mirrors the
/// selection.
pub fn set_recording_mode(dev: &mut Device, mode: u8) {
    let mut effective = mode;
    match mode {
        1 => {
            debug!(target: "opticd::recording", "activating track-at-once recording");
            dev.recording = Some(&TAO_RECORDING);
        }
        2 => {
            let is_cd = dev
                .disc
                .as_ref()
                .map(|d| d.medium_type() == MediumType::Cd)
                .unwrap_or(false);
            if is_cd {
                debug!(target: "opticd::recording", "activating session-at-once recording");
                dev.recording = Some(&SAO_RECORDING);
            } else {
                debug!(target: "opticd::recording", "activating disc-at-once recording");
                dev.recording = Some(&DAO_RECORDING);
            }
        }
        3 => {
            debug!(target: "opticd::recording", "activating raw recording");
            dev.recording = Some(&RAW_RECORDING);
        }
        other => {
            warn!(target: "opticd::recording", mode = other, "unhandled recording mode, resetting to TAO");
            effective = 1;
            dev.recording = Some(&TAO_RECORDING);
        }
    }

    if let Some(page) = dev.mode_pages.get_current_mut(0x05) {
        write_params::set_write_type(page, effective);
    }
}

// ============================================================================
// Generic recording helpers
// ============================================================================

fn recording_open_session(dev: &mut Device, session_type: SessionType) -> bool {
    let Some(disc) = dev.disc.as_mut() else {
        return false;
    };
    let idx = disc.add_session(Session::new(session_type));
    dev.open_session = Some(idx);

    let session = disc.session(idx).unwrap();
    debug!(
        target: "opticd::recording",
        number = session.session_number(),
        start_sector = session.start_sector(),
        first_track = session.first_track(),
        "opened session"
    );
    true
}

fn recording_open_track(dev: &mut Device, sector_type: SectorType) -> bool {
    if dev.open_track.is_some() {
        recording_close_track(dev);
    }
    let Some(session_idx) = dev.open_session else {
        return false;
    };
    let Some(disc) = dev.disc.as_mut() else {
        return false;
    };

    let track_idx = match disc.session_mut(session_idx) {
        Some(session) => session.add_track_by_index(Track::new(sector_type)),
        None => return false,
    };
    disc.relayout();
    dev.open_track = Some((session_idx, track_idx));

    debug!(
        target: "opticd::recording",
        session = session_idx,
        track = track_idx,
        sector_type = ?sector_type,
        "opened track"
    );
    true
}

fn recording_close_track(dev: &mut Device) -> bool {
    if dev.open_track.take().is_some() {
        debug!(target: "opticd::recording", "closing track");
    }
    true
}

fn recording_close_session(dev: &mut Device) -> bool {
    let Some(session_idx) = dev.open_session else {
        return true;
    };

    debug!(target: "opticd::recording", "closing session");

    if dev.open_track.is_some() {
        recording_close_track(dev);
    }

    // Assemble queued lead-in CD-TEXT packs into the session
    if !dev.leadin_cdtext_packs.is_empty() {
        debug!(
            target: "opticd::recording",
            packs = dev.leadin_cdtext_packs.len(),
            "processing lead-in CD-TEXT"
        );

        // Packs were prepended on arrival; restore their original order
        let mut packs = std::mem::take(&mut dev.leadin_cdtext_packs);
        packs.reverse();

        let mut cdtext_data = Vec::with_capacity(packs.len() * 18);
        for pack in &packs {
            cdtext_data.extend_from_slice(pack);
        }

        if let Some(session) =
            dev.disc.as_mut().and_then(|disc| disc.session_mut(session_idx))
        {
            session.set_cdtext_data(cdtext_data);
        }
    }

    dev.open_session = None;

    let multisession = dev
        .mode_pages
        .get(0x05, PageView::Current)
        .map(write_params::multisession)
        .unwrap_or(0);

    if multisession == 0 {
        dev.disc_closed = true;
        if let (Some(writer), Some(disc)) = (dev.writer.as_mut(), dev.disc.as_mut()) {
            if let Err(e) = writer.finalize_image(disc) {
                warn!(target: "opticd::recording", error = %e, "failed to finalize image");
            }
        }
        dev.emit_status_changed();
    }

    dev.num_written_sectors = 0;
    true
}

fn recording_write_sector(dev: &mut Device, sector: Sector) -> bool {
    let Some((session_idx, track_idx)) = dev.open_track else {
        warn!(target: "opticd::recording", "no track opened to write sector");
        return false;
    };
    let Some(disc) = dev.disc.as_mut() else {
        return false;
    };

    if let Err(e) = disc.put_sector(session_idx, track_idx, sector) {
        warn!(target: "opticd::recording", error = %e, "failed to write sector to track");
        return false;
    }
    true
}

/// Reshuffle a 96-byte raw P-W subchannel into the 72 CD-TEXT payload
/// bytes (four 18-byte packs)
pub fn extract_cdtext_data(subchannel: &[u8; 96]) -> [u8; 72] {
    let mut out = [0u8; 72];
    for (quad, chunk) in subchannel.chunks_exact(4).enumerate() {
        out[quad * 3] = ((chunk[0] << 2) & 0xFC) | ((chunk[1] >> 4) & 0x03);
        out[quad * 3 + 1] = ((chunk[1] << 4) & 0xF0) | ((chunk[2] >> 2) & 0x0F);
        out[quad * 3 + 2] = ((chunk[2] << 6) & 0xC0) | (chunk[3] & 0x3F);
    }
    out
}

fn recording_process_leadin_sector(dev: &mut Device, sector: &mut Sector) -> bool {
    let pw = sector.subchannel(SubchannelFormat::Pw);
    let mut subchannel = [0u8; 96];
    subchannel.copy_from_slice(&pw);

    let cdtext_data = extract_cdtext_data(&subchannel);

    for pack in cdtext_data.chunks_exact(18) {
        if pack[0] & 0x80 != 0x80 {
            continue;
        }
        // Packs arrive in reverse order; prepend those with a new number
        if pack[2] as usize >= dev.leadin_cdtext_packs.len() {
            let mut stored = [0u8; 18];
            stored.copy_from_slice(pack);
            dev.leadin_cdtext_packs.insert(0, stored);
        }
    }

    true
}

// ============================================================================
// Host data formats (mode page 0x05 data block types)
// ============================================================================

struct DataFormat {
    main_size: usize,
    sub_size: usize,
    sub_format: SubchannelFormat,
    sector_type: SectorType,
}

/// Data layouts selected by the data-block-type field; entries 4..=7 are
/// reserved
static RECORDING_DATA_FORMATS: [DataFormat; 14] = [
    // 0: 2352 bytes - raw data
    DataFormat { main_size: 2352, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Raw },
    // 1: 2368 bytes - raw data with P-Q subchannel
    DataFormat { main_size: 2352, sub_size: 16, sub_format: SubchannelFormat::Q, sector_type: SectorType::Raw },
    // 2: 2448 bytes - raw data with cooked R-W subchannel
    DataFormat { main_size: 2352, sub_size: 96, sub_format: SubchannelFormat::Rw, sector_type: SectorType::Raw },
    // 3: 2448 bytes - raw data with raw P-W subchannel
    DataFormat { main_size: 2352, sub_size: 96, sub_format: SubchannelFormat::Pw, sector_type: SectorType::Raw },
    // 4-7: reserved
    DataFormat { main_size: 0, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Raw },
    DataFormat { main_size: 0, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Raw },
    DataFormat { main_size: 0, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Raw },
    DataFormat { main_size: 0, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Raw },
    // 8: 2048 bytes - Mode 1 user data
    DataFormat { main_size: 2048, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Mode1 },
    // 9: 2336 bytes - Mode 2 user data
    DataFormat { main_size: 2336, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Mode2 },
    // 10: 2048 bytes - Mode 2 Form 1 user data
    DataFormat { main_size: 2048, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Mode2Form1 },
    // 11: 2056 bytes - Mode 2 Form 1 with subheader
    DataFormat { main_size: 2056, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Mode2Form1 },
    // 12: 2324 bytes - Mode 2 Form 2 user data
    DataFormat { main_size: 2324, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Mode2Form2 },
    // 13: 2332 bytes - Mode 2 with subheader (Form 1, Form 2 or mixed)
    DataFormat { main_size: 2332, sub_size: 0, sub_format: SubchannelFormat::None, sector_type: SectorType::Mode2Mixed },
];

/// Session type selected by the write parameters page
fn session_type_from_page(session_format: u8) -> SessionType {
    match session_format {
        0x10 => SessionType::Cdi,
        0x20 => SessionType::CdromXa,
        _ => SessionType::Cdrom,
    }
}

// ============================================================================
// Track-at-once
// ============================================================================

pub struct TaoRecording;

impl TaoRecording {
    fn open_session(&self, dev: &mut Device) -> bool {
        let page = dev.mode_pages.get(0x05, PageView::Current).unwrap().to_vec();
        if !recording_open_session(dev, session_type_from_page(write_params::session_format(&page)))
        {
            return false;
        }

        // MCN from the write parameters page, if set
        if let Some(mcn) = write_params::mcn(&page) {
            let mcn = String::from_utf8_lossy(mcn).into_owned();
            debug!(target: "opticd::recording", mcn = %mcn, "setting MCN from write parameters");
            let session_idx = dev.open_session.unwrap();
            if let Some(session) = dev.disc.as_mut().and_then(|d| d.session_mut(session_idx)) {
                session.set_mcn(&mcn);
            }
        }
        true
    }

    fn open_track(&self, dev: &mut Device, sector_type: SectorType) -> bool {
        if !recording_open_track(dev, sector_type) {
            return false;
        }
        let page = dev.mode_pages.get(0x05, PageView::Current).unwrap().to_vec();
        let (session_idx, track_idx) = dev.open_track.unwrap();
        let is_cd = dev
            .disc
            .as_ref()
            .map(|d| d.medium_type() == MediumType::Cd)
            .unwrap_or(false);

        let Some(writer) = dev.writer.as_ref() else {
            return false;
        };
        let pregap = {
            let mut fragment = writer.create_fragment(FragmentRole::Pregap);
            fragment.set_length(150);
            fragment
        };
        let data = writer.create_fragment(FragmentRole::Data);

        let Some(track) =
            dev.disc.as_mut().and_then(|d| d.track_mut(session_idx, track_idx))
        else {
            return false;
        };

        if let Some(isrc) = write_params::isrc(&page) {
            let isrc = String::from_utf8_lossy(isrc).into_owned();
            debug!(target: "opticd::recording", isrc = %isrc, "setting ISRC from write parameters");
            track.set_isrc(&isrc);
        }
        track.set_ctl(write_params::track_mode(&page));

        // A CD-ROM track carries a 150-sector pregap
        if is_cd {
            track.add_fragment(-1, pregap);
            track.set_track_start(150);
            dev.num_written_sectors += 150;
        }
        track.add_fragment(-1, data);
        dev.disc.as_mut().unwrap().relayout();

        true
    }

    fn write_sector(&self, dev: &mut Device, sector: Sector) -> bool {
        if dev.open_session.is_none() {
            debug!(target: "opticd::recording", "no session opened, opening one");
            if !self.open_session(dev) {
                warn!(target: "opticd::recording", "failed to open new session");
                return false;
            }
        }
        if dev.open_track.is_none() {
            debug!(target: "opticd::recording", "no track opened, opening one");
            if !self.open_track(dev, sector.sector_type()) {
                warn!(target: "opticd::recording", "failed to open new track");
                return false;
            }
        }
        recording_write_sector(dev, sector)
    }
}

impl RecordingStrategy for TaoRecording {
    fn write_sectors(
        &self,
        dev: &mut Device,
        io: &mut CommandIo<'_>,
        start_address: i32,
        count: i32,
    ) -> bool {
        let page = dev.mode_pages.get(0x05, PageView::Current).unwrap().to_vec();
        let is_cd = dev
            .disc
            .as_ref()
            .map(|d| d.medium_type() == MediumType::Cd)
            .unwrap_or(false);

        let data_block_type = if is_cd { write_params::data_block_type(&page) } else { 8 };
        let format = &RECORDING_DATA_FORMATS[data_block_type as usize];
        if format.main_size == 0 {
            warn!(target: "opticd::recording", data_block_type, "reserved data block type");
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
            return false;
        }

        debug!(
            target: "opticd::recording",
            start_address,
            count,
            sector_type = ?format.sector_type,
            data_block_type,
            "TAO write"
        );

        let mut sector_type = format.sector_type;

        for address in start_address..start_address + count {
            dev.read_buffer(io, format.main_size + format.sub_size);

            // With a track open, its detected type overrides the generic
            // raw type
            if sector_type == SectorType::Raw {
                if let Some((s, t)) = dev.open_track {
                    if let Some(track) =
                        dev.disc.as_ref().and_then(|d| d.session(s)).and_then(|s| s.track_by_index(t as i32))
                    {
                        sector_type = track.sector_type();
                    }
                }
            }

            let main = dev.cache[..format.main_size].to_vec();
            let sub = dev.cache[format.main_size..format.main_size + format.sub_size].to_vec();

            let mut sector = match Sector::feed_data(
                address,
                sector_type,
                &main,
                format.sub_format,
                &sub,
                IgnoreFields::empty(),
            ) {
                Ok(sector) => sector,
                Err(e) => {
                    warn!(target: "opticd::recording", error = %e, "failed to feed sector");
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
                    return false;
                }
            };

            // Data block types 10 and 12 take the subheader from the write
            // parameters page
            if is_cd && (data_block_type == 10 || data_block_type == 12) {
                sector.set_subheader(write_params::subheader(&page));
            }

            if !self.write_sector(dev, sector) {
                dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
                return false;
            }

            dev.num_written_sectors += 1;
        }

        true
    }

    fn next_writable_address(&self, dev: &Device) -> i32 {
        dev.num_written_sectors
    }
}

// ============================================================================
// Raw recording
// ============================================================================

pub struct RawRecording;

impl RawRecording {
    fn write_sector(
        &self,
        dev: &mut Device,
        address: i32,
        mut sector: Sector,
    ) -> bool {
        let q = sector.subchannel(SubchannelFormat::Q);
        let adr = q[0] & 0x0F;
        let ctl = q[0] >> 4;
        let tno = q[1];
        let idx = q[2];
        let track_relative =
            msf::msf_to_lba(bcd_to_hex(q[3]), bcd_to_hex(q[4]), bcd_to_hex(q[5]), false);
        let absolute =
            msf::msf_to_lba(bcd_to_hex(q[7]), bcd_to_hex(q[8]), bcd_to_hex(q[9]), true);

        // Lead-in carries the TOC in Q and CD-TEXT in R-W; session layout
        // is inferred from the data sectors instead
        if tno == 0x00 {
            if dev.open_session.is_none() {
                debug!(target: "opticd::recording", "first lead-in sector, opening session");
                recording_open_session(dev, SessionType::Cdrom);
                dev.last_recorded_tno = 0;
                dev.last_recorded_idx = 0;
            }
            return recording_process_leadin_sector(dev, &mut sector);
        }

        // Lead-out tells us when to close the session
        if tno == 0xAA {
            if dev.open_session.is_some() {
                debug!(target: "opticd::recording", "first lead-out sector, closing session");
                recording_close_session(dev);
            }
            return true;
        }

        // Without an open session we are inside the lead-out (e.g. MCN
        // repeats); nothing to record
        if dev.open_session.is_none() {
            return true;
        }

        if adr == 1 {
            if absolute != address {
                warn!(
                    target: "opticd::recording",
                    command = address,
                    encoded = absolute,
                    "command LBA does not match LBA encoded in sector"
                );
            }

            if tno != dev.last_recorded_tno {
                debug!(target: "opticd::recording", tno, "TNO changed, opening new track");

                if dev.open_track.is_some() {
                    recording_close_track(dev);
                }
                if !recording_open_track(dev, sector.sector_type()) {
                    return false;
                }

                let Some(writer) = dev.writer.as_ref() else {
                    return false;
                };
                let fragment = if idx == 0 {
                    debug!(
                        target: "opticd::recording",
                        pregap_length = track_relative + 1,
                        "track has a pregap"
                    );
                    writer.create_fragment(FragmentRole::Pregap)
                } else {
                    writer.create_fragment(FragmentRole::Data)
                };

                let (s, t) = dev.open_track.unwrap();
                if let Some(track) = dev.disc.as_mut().and_then(|d| d.track_mut(s, t)) {
                    track.set_ctl(ctl);
                    if idx == 0 {
                        track.set_track_start(track_relative + 1);
                    }
                    track.add_fragment(-1, fragment);
                }
                dev.disc.as_mut().unwrap().relayout();

                dev.last_recorded_tno = tno;
                dev.last_recorded_idx = idx;
            } else if idx != dev.last_recorded_idx {
                debug!(
                    target: "opticd::recording",
                    from = dev.last_recorded_idx,
                    to = idx,
                    "index changed"
                );

                if idx == 1 {
                    // End of the pregap: data fragment begins
                    let Some(writer) = dev.writer.as_ref() else {
                        return false;
                    };
                    let fragment = writer.create_fragment(FragmentRole::Data);
                    let (s, t) = dev.open_track.unwrap();
                    if let Some(track) = dev.disc.as_mut().and_then(|d| d.track_mut(s, t)) {
                        track.add_fragment(-1, fragment);
                    }
                    dev.disc.as_mut().unwrap().relayout();
                } else {
                    let (s, t) = dev.open_track.unwrap();
                    if let Some(track) = dev.disc.as_mut().and_then(|d| d.track_mut(s, t)) {
                        debug!(
                            target: "opticd::recording",
                            address = track_relative,
                            "adding index"
                        );
                        track.add_index(track_relative);
                    }
                }
                dev.last_recorded_idx = idx;
            }
        } else if adr == 2 {
            // MCN, once
            if let Some(session_idx) = dev.open_session {
                if let Some(session) =
                    dev.disc.as_mut().and_then(|d| d.session_mut(session_idx))
                {
                    if session.mcn().is_none() {
                        let mcn = msf::q_decode_mcn(&q[1..10]);
                        debug!(target: "opticd::recording", mcn = %mcn, "setting MCN");
                        session.set_mcn(&mcn);
                    }
                }
            }
        } else if adr == 3 {
            // ISRC, once
            if let Some((s, t)) = dev.open_track {
                if let Some(track) = dev.disc.as_mut().and_then(|d| d.track_mut(s, t)) {
                    if track.isrc().is_none() {
                        let isrc = msf::q_decode_isrc(&q[1..10]);
                        debug!(target: "opticd::recording", isrc = %isrc, "setting ISRC");
                        track.set_isrc(&isrc);
                    }
                }
            }
        }

        if dev.open_track.is_none() {
            warn!(target: "opticd::recording", "no track opened to write sector");
            return false;
        }

        recording_write_sector(dev, sector)
    }
}

impl RecordingStrategy for RawRecording {
    fn write_sectors(
        &self,
        dev: &mut Device,
        io: &mut CommandIo<'_>,
        start_address: i32,
        count: i32,
    ) -> bool {
        let page = dev.mode_pages.get(0x05, PageView::Current).unwrap().to_vec();
        let format = &RECORDING_DATA_FORMATS[write_params::data_block_type(&page) as usize];
        if format.main_size != 2352 {
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
            return false;
        }

        for address in start_address..start_address + count {
            dev.read_buffer(io, format.main_size + format.sub_size);

            let main = dev.cache[..format.main_size].to_vec();
            let sub = dev.cache[format.main_size..format.main_size + format.sub_size].to_vec();

            // Raw recording feeds scrambled frames
            let sector = match Sector::feed_data(
                address,
                SectorType::RawScrambled,
                &main,
                format.sub_format,
                &sub,
                IgnoreFields::empty(),
            ) {
                Ok(sector) => sector,
                Err(e) => {
                    warn!(target: "opticd::recording", error = %e, "failed to feed sector");
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
                    return false;
                }
            };

            if !self.write_sector(dev, address, sector) {
                dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
                return false;
            }

            dev.num_written_sectors += 1;
        }

        true
    }

    fn next_writable_address(&self, dev: &Device) -> i32 {
        dev.medium_leadin + dev.num_written_sectors
    }
}

// ============================================================================
// Session-at-once
// ============================================================================

struct SaoMainFormat {
    format: u8,
    sector_type: SectorType,
    data_size: usize,
    ignore: IgnoreFields,
}

static SAO_MAIN_FORMATS: &[SaoMainFormat] = &[
    // CD-DA
    SaoMainFormat { format: 0x00, sector_type: SectorType::Audio, data_size: 2352, ignore: IgnoreFields::empty() },
    SaoMainFormat { format: 0x01, sector_type: SectorType::Audio, data_size: 0, ignore: IgnoreFields::empty() },
    // CD-ROM Mode 1
    SaoMainFormat { format: 0x10, sector_type: SectorType::Mode1, data_size: 2048, ignore: IgnoreFields::empty() },
    SaoMainFormat { format: 0x11, sector_type: SectorType::Mode1, data_size: 2352, ignore: IgnoreFields::SYNC.union(IgnoreFields::HEADER).union(IgnoreFields::EDC_ECC) },
    SaoMainFormat { format: 0x12, sector_type: SectorType::Mode1, data_size: 2048, ignore: IgnoreFields::DATA },
    SaoMainFormat { format: 0x13, sector_type: SectorType::Mode1, data_size: 2352, ignore: IgnoreFields::SYNC.union(IgnoreFields::HEADER).union(IgnoreFields::DATA).union(IgnoreFields::EDC_ECC) },
    SaoMainFormat { format: 0x14, sector_type: SectorType::Mode1, data_size: 0, ignore: IgnoreFields::empty() },
    // CD-ROM XA, CD-I
    SaoMainFormat { format: 0x20, sector_type: SectorType::Mode2Mixed, data_size: 2336, ignore: IgnoreFields::EDC_ECC },
    SaoMainFormat { format: 0x21, sector_type: SectorType::Mode2Mixed, data_size: 2352, ignore: IgnoreFields::SYNC.union(IgnoreFields::HEADER).union(IgnoreFields::EDC_ECC) },
    SaoMainFormat { format: 0x22, sector_type: SectorType::Mode2Mixed, data_size: 2336, ignore: IgnoreFields::DATA.union(IgnoreFields::EDC_ECC) },
    SaoMainFormat { format: 0x23, sector_type: SectorType::Mode2Mixed, data_size: 2352, ignore: IgnoreFields::SYNC.union(IgnoreFields::HEADER).union(IgnoreFields::DATA).union(IgnoreFields::EDC_ECC) },
    SaoMainFormat { format: 0x24, sector_type: SectorType::Mode2Form2, data_size: 0, ignore: IgnoreFields::empty() },
    // CD-ROM Mode 2
    SaoMainFormat { format: 0x30, sector_type: SectorType::Mode2, data_size: 2336, ignore: IgnoreFields::empty() },
    SaoMainFormat { format: 0x31, sector_type: SectorType::Mode2, data_size: 2352, ignore: IgnoreFields::SYNC.union(IgnoreFields::HEADER) },
    SaoMainFormat { format: 0x32, sector_type: SectorType::Mode2, data_size: 2336, ignore: IgnoreFields::DATA },
    SaoMainFormat { format: 0x33, sector_type: SectorType::Mode2, data_size: 2352, ignore: IgnoreFields::SYNC.union(IgnoreFields::HEADER).union(IgnoreFields::DATA) },
    SaoMainFormat { format: 0x34, sector_type: SectorType::Mode2, data_size: 0, ignore: IgnoreFields::empty() },
];

struct SaoSubchannelFormat {
    format: u8,
    mode: SubchannelFormat,
    data_size: usize,
}

static SAO_SUBCHANNEL_FORMATS: &[SaoSubchannelFormat] = &[
    SaoSubchannelFormat { format: 0x00, mode: SubchannelFormat::None, data_size: 0 },
    SaoSubchannelFormat { format: 0x01, mode: SubchannelFormat::Pw, data_size: 96 },
    SaoSubchannelFormat { format: 0x03, mode: SubchannelFormat::Rw, data_size: 96 },
];

fn sao_main_format(format: u8) -> Option<&'static SaoMainFormat> {
    let code = format & 0x3F;
    SAO_MAIN_FORMATS.iter().find(|f| f.format == code)
}

fn sao_subchannel_format(format: u8) -> Option<&'static SaoSubchannelFormat> {
    let code = format >> 6;
    SAO_SUBCHANNEL_FORMATS.iter().find(|f| f.format == code)
}

/// Parse a SEND CUE SHEET payload into the cue model. Returns false on a
/// malformed sheet.
pub fn sao_parse_cue_sheet(dev: &mut Device, cue: &[u8]) -> bool {
    let num_entries = cue.len() / 8;
    debug!(target: "opticd::recording", num_entries, "parsing CUE sheet");

    let Some(disc) = dev.disc.as_ref() else {
        return false;
    };

    // The cue model continues the disc's existing layout
    let mut sheet = Session::new(session_type_from_page(
        dev.mode_pages
            .get(0x05, PageView::Current)
            .map(write_params::session_format)
            .unwrap_or(0),
    ));
    sheet.set_session_number(disc.first_session() + disc.number_of_sessions() as i32);
    sheet.set_start_sector(disc.layout_start_sector() + disc.layout_length());
    sheet.set_first_track(disc.first_track() + disc.number_of_tracks() as i32);

    dev.sao_leadin_format = 0;

    // First pass: create the tracks
    for entry in cue.chunks_exact(8) {
        let adr = entry[0] & 0x0F;
        let ctl = entry[0] >> 4;
        let tno = entry[1];
        let idx = entry[2];

        if adr != 1 {
            continue;
        }

        // Lead-in selects the raw SAO submode
        if tno == 0 {
            debug!(target: "opticd::recording", format = entry[3], "lead-in data format");
            dev.sao_leadin_format = entry[3];
            continue;
        }
        if tno == 0xAA || idx > 1 {
            continue;
        }

        if sheet.track_by_number(tno as i32).is_none() {
            debug!(target: "opticd::recording", tno, "creating track");

            let sector_type = if dev.sao_leadin_format & 0xC0 != 0 {
                // Raw submode: only the CTL data bit hints at the type
                if ctl & 0x04 != 0 {
                    SectorType::RawScrambled
                } else {
                    SectorType::Audio
                }
            } else {
                match sao_main_format(entry[3]) {
                    Some(format) => format.sector_type,
                    None => {
                        warn!(
                            target: "opticd::recording",
                            format = entry[3],
                            tno,
                            "invalid format in CUE sheet"
                        );
                        return false;
                    }
                }
            };

            let mut track = Track::new(sector_type);
            track.set_ctl(ctl);
            sheet.add_track_by_number(tno as i32, track);
        }
    }

    // Second pass, backwards: lengths and pregaps from adjacent addresses
    let mut last_address = 0i32;
    for entry in cue.chunks_exact(8).rev() {
        let adr = entry[0] & 0x0F;
        let tno = entry[1];
        let idx = entry[2];

        if adr != 1 || tno == 0 || idx > 1 {
            continue;
        }

        let address = msf::msf_to_lba(entry[5], entry[6], entry[7], true);

        if tno != 0xAA {
            let length = last_address - address;
            debug!(
                target: "opticd::recording",
                tno, idx, length,
                format = entry[3],
                "cue entry"
            );

            if let Some(track) = sheet.track_by_number_mut(tno as i32) {
                let mut fragment = Fragment::new(FragmentRole::Data, FragmentData::Empty);
                fragment.set_length(length);
                // The fragment's main format carries the cue data form
                fragment.set_main_format(entry[3] as i32);
                track.add_fragment(0, fragment);

                if idx == 0 {
                    track.set_track_start(length);
                }
            }
        }
        last_address = address;
    }
    sheet.relayout();

    // Final pass: indices, MCN and ISRC
    let entries: Vec<&[u8]> = cue.chunks_exact(8).collect();
    let mut last_index1 = 0i32;
    let mut i = 0;
    while i < entries.len() {
        let entry = entries[i];
        let adr = entry[0] & 0x0F;
        let tno = entry[1];
        let idx = entry[2];

        if adr == 1 {
            let address = msf::msf_to_lba(entry[5], entry[6], entry[7], true);
            if idx == 1 {
                last_index1 = address;
            } else if idx > 1 {
                debug!(target: "opticd::recording", tno, idx, "adding index");
                if let Some(track) = sheet.track_by_number_mut(tno as i32) {
                    track.add_index(address - last_index1);
                }
            }
        } else if adr == 2 || adr == 3 {
            // MCN and ISRC span two consecutive entries of the same ADR
            let Some(next) = entries.get(i + 1) else {
                debug!(target: "opticd::recording", "missing second MCN/ISRC entry, skipping");
                break;
            };
            if next[0] & 0x0F != adr {
                i += 1;
                continue;
            }

            if adr == 2 {
                let mut mcn = String::new();
                for &b in entry[1..8].iter().chain(next[1..7].iter()) {
                    mcn.push(b as char);
                }
                debug!(target: "opticd::recording", mcn = %mcn, "MCN from cue sheet");
                sheet.set_mcn(&mcn);
            } else {
                let mut isrc = String::new();
                for &b in entry[2..8].iter().chain(next[2..8].iter()) {
                    isrc.push(b as char);
                }
                debug!(target: "opticd::recording", tno, isrc = %isrc, "ISRC from cue sheet");
                if let Some(track) = sheet.track_by_number_mut(tno as i32) {
                    track.set_isrc(&isrc);
                }
            }
            i += 1;
        }
        i += 1;
    }

    dev.cue_entry_tno = None;
    dev.cue_sheet = Some(sheet);
    true
}

pub struct SaoRecording;

impl SaoRecording {
    fn open_session(&self, dev: &mut Device, cue: &Session) -> bool {
        if !recording_open_session(dev, cue.session_type()) {
            return false;
        }
        if let Some(mcn) = cue.mcn().map(str::to_string) {
            let session_idx = dev.open_session.unwrap();
            if let Some(session) = dev.disc.as_mut().and_then(|d| d.session_mut(session_idx)) {
                session.set_mcn(&mcn);
            }
        }
        true
    }

    fn open_track(&self, dev: &mut Device, cue_track: &Track) -> bool {
        if !recording_open_track(dev, cue_track.sector_type()) {
            return false;
        }

        let Some(writer) = dev.writer.as_ref() else {
            return false;
        };

        // Clone the cue track's fragment layout
        let mut fragments = Vec::new();
        for i in 0..cue_track.number_of_fragments() {
            let entry_fragment = cue_track.fragment_by_index(i).unwrap();
            let role = if entry_fragment.address() < cue_track.track_start() {
                FragmentRole::Pregap
            } else {
                FragmentRole::Data
            };
            debug!(
                target: "opticd::recording",
                index = i,
                length = entry_fragment.length(),
                role = ?role,
                "constructing fragment from CUE sheet"
            );
            let mut fragment = writer.create_fragment(role);
            fragment.set_length(entry_fragment.length());
            fragments.push(fragment);
        }

        let (s, t) = dev.open_track.unwrap();
        let Some(track) = dev.disc.as_mut().and_then(|d| d.track_mut(s, t)) else {
            return false;
        };
        for fragment in fragments {
            track.add_fragment(-1, fragment);
        }
        track.set_flags(cue_track.flags());
        if let Some(isrc) = cue_track.isrc() {
            let isrc = isrc.to_string();
            track.set_isrc(&isrc);
        }
        track.set_track_start(cue_track.track_start());
        for &index in cue_track.indices() {
            track.add_index(index);
        }
        dev.disc.as_mut().unwrap().relayout();
        true
    }

    fn write_loop(
        &self,
        dev: &mut Device,
        io: &mut CommandIo<'_>,
        cue: &Session,
        start_address: i32,
        count: i32,
    ) -> bool {
        let mut current_format: Option<(&SaoMainFormat, &SaoSubchannelFormat)> = None;

        for address in start_address..start_address + count {
            // In raw SAO mode the host sends the lead-in itself
            if address < -150 && dev.sao_leadin_format & 0xC0 != 0 {
                debug!(target: "opticd::recording", address, "lead-in sector for raw SAO");

                let (Some(main), Some(sub)) = (
                    sao_main_format(dev.sao_leadin_format),
                    sao_subchannel_format(dev.sao_leadin_format),
                ) else {
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
                    return false;
                };

                dev.read_buffer(io, main.data_size + sub.data_size);
                let main_bytes = dev.cache[..main.data_size].to_vec();
                let sub_bytes =
                    dev.cache[main.data_size..main.data_size + sub.data_size].to_vec();

                match Sector::feed_data(
                    address,
                    SectorType::Audio,
                    &main_bytes,
                    sub.mode,
                    &sub_bytes,
                    main.ignore,
                ) {
                    Ok(mut sector) => {
                        recording_process_leadin_sector(dev, &mut sector);
                    }
                    Err(e) => {
                        warn!(target: "opticd::recording", error = %e, "failed to feed lead-in sector");
                    }
                }
                continue;
            }

            // Crossing into a new cue track opens session/track as needed
            let entry_changed = match dev.cue_entry_tno {
                Some(tno) => {
                    let track = cue.track_by_number(tno);
                    !track
                        .map(|t| {
                            address >= t.start_sector() && address < t.start_sector() + t.length()
                        })
                        .unwrap_or(false)
                }
                None => true,
            };

            if entry_changed {
                debug!(target: "opticd::recording", address, "looking up cue entry");
                let Some(cue_track) = cue.track_by_address(address) else {
                    warn!(target: "opticd::recording", address, "no cue entry for address");
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
                    return false;
                };
                dev.cue_entry_tno = Some(cue_track.number());
                current_format = None;

                if dev.open_session.is_none() && !self.open_session(dev, cue) {
                    return false;
                }
                if !self.open_track(dev, cue_track) {
                    return false;
                }
            }

            let cue_track = cue.track_by_number(dev.cue_entry_tno.unwrap()).unwrap();

            // Data format follows the cue fragment under the address
            if current_format.is_none() {
                let rel = address - cue_track.start_sector();
                let Some(fragment) = cue_track.fragment_by_address(rel) else {
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
                    return false;
                };
                let format = fragment.main_format() as u8;
                debug!(target: "opticd::recording", format, "data format for subsequent sectors");
                let (Some(main), Some(sub)) =
                    (sao_main_format(format), sao_subchannel_format(format))
                else {
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
                    return false;
                };
                current_format = Some((main, sub));
            }
            let (main, sub) = current_format.unwrap();

            // Re-evaluate the format when the next sector crosses a
            // fragment boundary
            {
                let rel = address + 1 - cue_track.start_sector();
                let same = cue_track
                    .fragment_by_address(rel - 1)
                    .map(|f| f.contains_address(rel))
                    .unwrap_or(false);
                if !same {
                    current_format = None;
                }
            }

            dev.read_buffer(io, main.data_size + sub.data_size);
            let main_bytes = dev.cache[..main.data_size].to_vec();
            let sub_bytes = dev.cache[main.data_size..main.data_size + sub.data_size].to_vec();

            // The cue entry's sector type is authoritative, especially for
            // raw SAO
            let mut sector_type = cue_track.sector_type();

            let sector = match Sector::feed_data(
                address,
                sector_type,
                &main_bytes,
                sub.mode,
                &sub_bytes,
                main.ignore,
            ) {
                Ok(sector) => sector,
                Err(e) => {
                    warn!(target: "opticd::recording", error = %e, "failed to feed sector");
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
                    return false;
                }
            };

            // A raw-scrambled track takes its concrete type from the first
            // fed sector
            if let Some((s, t)) = dev.open_track {
                let open_type = dev
                    .disc
                    .as_ref()
                    .and_then(|d| d.session(s))
                    .and_then(|session| session.tracks().get(t))
                    .map(|track| track.sector_type());
                if open_type == Some(SectorType::RawScrambled) {
                    sector_type = match sector.sector_type() {
                        SectorType::Mode2Form1 | SectorType::Mode2Form2 => SectorType::Mode2Mixed,
                        other => other,
                    };
                    if let Some(track) = dev.disc.as_mut().and_then(|d| d.track_mut(s, t)) {
                        track.set_sector_type(sector_type);
                    }
                }
            }

            if !recording_write_sector(dev, sector) {
                dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
                return false;
            }

            dev.num_written_sectors += 1;
        }

        true
    }
}

impl RecordingStrategy for SaoRecording {
    fn write_sectors(
        &self,
        dev: &mut Device,
        io: &mut CommandIo<'_>,
        start_address: i32,
        count: i32,
    ) -> bool {
        let Some(cue) = dev.cue_sheet.take() else {
            debug!(target: "opticd::recording", "CUE sheet not set");
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
            return false;
        };

        let succeeded = self.write_loop(dev, io, &cue, start_address, count);

        let session_end = cue.start_sector() + cue.tracks_length();
        dev.cue_sheet = Some(cue);

        if start_address + count >= session_end {
            debug!(target: "opticd::recording", "end of session reached, closing");
            recording_close_session(dev);
        }

        succeeded
    }

    fn next_writable_address(&self, dev: &Device) -> i32 {
        -150 + dev.num_written_sectors
    }
}

// ============================================================================
// Disc-at-once (DVD/BD)
// ============================================================================

pub struct DaoRecording;

impl RecordingStrategy for DaoRecording {
    fn write_sectors(
        &self,
        dev: &mut Device,
        io: &mut CommandIo<'_>,
        start_address: i32,
        count: i32,
    ) -> bool {
        // RESERVE TRACK normally opened the track already
        if dev.open_track.is_none() && !self.reserve_track(dev, 0) {
            warn!(target: "opticd::recording", "failed to open track");
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
            return false;
        }

        // DVD recording carries only Mode 1 data
        let data_block_type = dev
            .mode_pages
            .get(0x05, PageView::Current)
            .map(write_params::data_block_type)
            .unwrap_or(0);
        if data_block_type != 8 {
            warn!(target: "opticd::recording", data_block_type, "data block type is not 8");
            dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
            return false;
        }

        for address in start_address..start_address + count {
            dev.read_buffer(io, 2048);
            let main = dev.cache[..2048].to_vec();

            let sector = match Sector::feed_data(
                address,
                SectorType::Mode1,
                &main,
                SubchannelFormat::None,
                &[],
                IgnoreFields::empty(),
            ) {
                Ok(sector) => sector,
                Err(e) => {
                    warn!(target: "opticd::recording", error = %e, "failed to feed sector");
                    dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::INVALID_FIELD_IN_PARAMETER_LIST);
                    return false;
                }
            };

            if !recording_write_sector(dev, sector) {
                dev.write_sense(io, sense_key::ILLEGAL_REQUEST, asc_ascq::COMMAND_SEQUENCE_ERROR);
                return false;
            }

            dev.num_written_sectors += 1;
        }

        true
    }

    fn next_writable_address(&self, dev: &Device) -> i32 {
        dev.num_written_sectors
    }

    fn reserve_track(&self, dev: &mut Device, length: u32) -> bool {
        if dev.open_session.is_none() {
            debug!(target: "opticd::recording", "no session opened, opening one");
            if !recording_open_session(dev, SessionType::Cdrom) {
                return false;
            }
        }
        if !recording_open_track(dev, SectorType::Mode1) {
            return false;
        }

        let Some(writer) = dev.writer.as_ref() else {
            return false;
        };
        let mut fragment = writer.create_fragment(FragmentRole::Data);
        fragment.set_length(length as i32);

        let (s, t) = dev.open_track.unwrap();
        if let Some(track) = dev.disc.as_mut().and_then(|d| d.track_mut(s, t)) {
            track.add_fragment(-1, fragment);
        }
        dev.disc.as_mut().unwrap().relayout();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::test_device;
    use crate::image::{Disc, ImageWriter};
    use std::collections::HashMap;

    /// Wire a device up as a blank CD-R the way disc creation does
    fn blank_cd_device() -> (Device, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.iso");

        let mut dev = test_device();
        let mut disc = Disc::new(MediumType::Cd);
        disc.set_layout_start_sector(-150);
        let mut writer = ImageWriter::create("writer-raw", &path).unwrap();
        writer.open_image(&mut disc, HashMap::new()).unwrap();

        dev.disc = Some(disc);
        dev.writer = Some(writer);
        dev.recordable_disc = true;
        dev.medium_capacity = 80 * 60 * 75;
        dev.medium_leadin = -11077;
        set_recording_mode(&mut dev, 1);
        (dev, dir)
    }

    fn write_through(dev: &mut Device, payload: &[u8], start: i32, count: i32) -> bool {
        let recording = dev.recording.unwrap();
        let mut output = [0u8; 64];
        let mut io = CommandIo::new(payload, &mut output);
        recording.write_sectors(dev, &mut io, start, count)
    }

    #[test]
    fn test_mode_switch_updates_page() {
        let (mut dev, _dir) = blank_cd_device();

        set_recording_mode(&mut dev, 2);
        let page = dev.mode_pages.get(0x05, PageView::Current).unwrap();
        assert_eq!(write_params::write_type(page), 2);

        set_recording_mode(&mut dev, 9);
        let page = dev.mode_pages.get(0x05, PageView::Current).unwrap();
        assert_eq!(write_params::write_type(page), 1);
    }

    #[test]
    fn test_tao_first_write_creates_pregap() {
        let (mut dev, _dir) = blank_cd_device();

        // Single Mode 1 sector at LBA 0 (data block type 8 is the default)
        let payload = vec![0x42u8; 2048];
        assert!(write_through(&mut dev, &payload, 0, 1));

        let disc = dev.disc.as_ref().unwrap();
        assert_eq!(disc.number_of_sessions(), 1);
        assert_eq!(disc.number_of_tracks(), 1);

        let track = disc.track_by_number(1).unwrap();
        assert_eq!(track.track_start(), 150);
        assert_eq!(track.length(), 151); // pregap + 1 data sector

        // NWA: 150 pregap + 1 written
        let recording = dev.recording.unwrap();
        assert_eq!(recording.next_writable_address(&dev), 151);
    }

    #[test]
    fn test_tao_close_session_finalizes_disc() {
        let (mut dev, _dir) = blank_cd_device();
        let payload = vec![0x01u8; 2048];
        assert!(write_through(&mut dev, &payload, 0, 1));

        let recording = dev.recording.unwrap();
        assert!(recording.close_session(&mut dev));

        // Multisession bit is clear by default: disc is finalized
        assert!(dev.disc_closed);
        assert!(dev.open_session.is_none());
        assert!(dev.open_track.is_none());
        assert_eq!(dev.num_written_sectors, 0);
    }

    #[test]
    fn test_dao_reserve_then_write() {
        let (mut dev, _dir) = blank_cd_device();
        dev.disc.as_mut().unwrap().set_medium_type(MediumType::Dvd);
        dev.disc.as_mut().unwrap().set_layout_start_sector(0);
        set_recording_mode(&mut dev, 2);

        let recording = dev.recording.unwrap();
        assert!(recording.reserve_track(&mut dev, 100));

        let track = dev.disc.as_ref().unwrap().track_by_number(1).unwrap();
        assert_eq!(track.length(), 100);

        let payload = vec![0xAB; 2048 * 2];
        assert!(write_through(&mut dev, &payload, 0, 2));
        assert_eq!(dev.num_written_sectors, 2);
    }

    #[test]
    fn test_cue_sheet_parsing() {
        let (mut dev, _dir) = blank_cd_device();
        set_recording_mode(&mut dev, 2);

        // Track 1 with 150-sector pregap and data, track 2, lead-out
        let cue: Vec<u8> = [
            [0x41, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            [0x41, 0x01, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00],
            [0x41, 0x02, 0x01, 0x00, 0x00, 0x00, 0x04, 0x00],
            [0x41, 0xAA, 0x01, 0x01, 0x00, 0x00, 0x05, 0x00],
        ]
        .concat();

        assert!(sao_parse_cue_sheet(&mut dev, &cue));
        let sheet = dev.cue_sheet.as_ref().unwrap();

        assert_eq!(sheet.number_of_tracks(), 2);
        assert_eq!(sheet.start_sector(), -150);

        let track1 = sheet.track_by_number(1).unwrap();
        assert_eq!(track1.track_start(), 150);
        assert_eq!(track1.length(), 300); // 150 pregap + 150 data
        assert_eq!(track1.number_of_fragments(), 2);

        let track2 = sheet.track_by_number(2).unwrap();
        assert_eq!(track2.length(), 75);
        assert_eq!(track2.start_sector(), 150);
    }

    #[test]
    fn test_cue_sheet_mcn_and_isrc() {
        let (mut dev, _dir) = blank_cd_device();
        set_recording_mode(&mut dev, 2);

        let mut cue = Vec::new();
        // MCN pair (ADR 2): 7 + 6 characters
        cue.extend_from_slice(&[0x21, b'1', b'2', b'3', b'4', b'5', b'6', b'7']);
        cue.extend_from_slice(&[0x21, b'8', b'9', b'0', b'1', b'2', b'8', 0x00]);
        // ISRC pair (ADR 3) for track 1: 6 + 6 characters
        cue.extend_from_slice(&[0x31, 0x01, b'U', b'S', b'A', b'B', b'1', b'0']);
        cue.extend_from_slice(&[0x31, 0x01, b'5', b'0', b'0', b'0', b'0', b'1']);
        // Track 1 and lead-out
        cue.extend_from_slice(&[0x41, 0x01, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00]);
        cue.extend_from_slice(&[0x41, 0xAA, 0x01, 0x01, 0x00, 0x00, 0x04, 0x00]);

        assert!(sao_parse_cue_sheet(&mut dev, &cue));
        let sheet = dev.cue_sheet.as_ref().unwrap();
        assert_eq!(sheet.mcn(), Some("1234567890128"));
        assert_eq!(sheet.track_by_number(1).unwrap().isrc(), Some("USAB10500001"));
    }

    #[test]
    fn test_sao_write_requires_cue_sheet() {
        let (mut dev, _dir) = blank_cd_device();
        set_recording_mode(&mut dev, 2);

        let payload = vec![0u8; 2048];
        assert!(!write_through(&mut dev, &payload, 0, 1));
    }

    #[test]
    fn test_sao_write_closes_session_at_end() {
        let (mut dev, _dir) = blank_cd_device();
        set_recording_mode(&mut dev, 2);

        let cue: Vec<u8> = [
            [0x41, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            [0x41, 0x01, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00],
            [0x41, 0xAA, 0x01, 0x01, 0x00, 0x00, 0x03, 0x00],
        ]
        .concat();
        assert!(sao_parse_cue_sheet(&mut dev, &cue));

        // Write the whole session: 150 pregap + 75 data audio sectors
        // (format 0x00: 2352-byte audio)
        let frames = 225usize;
        let payload = vec![0u8; frames * 2352];
        assert!(write_through(&mut dev, &payload, -150, frames as i32));

        // Reaching the session end closes it
        assert!(dev.open_session.is_none());
        assert!(dev.disc_closed);
    }

    #[test]
    fn test_cdtext_extraction_shape() {
        // A pack header byte with bit 7 set must survive the reshuffle
        let mut pw = [0u8; 96];
        // First output byte is built from the first quadruple
        pw[0] = 0x20; // 0x20 << 2 = 0x80
        let out = extract_cdtext_data(&pw);
        assert_eq!(out[0], 0x80);
        assert_eq!(out.len(), 72);
    }

    #[test]
    fn test_raw_leadin_collects_cdtext_packs() {
        let (mut dev, _dir) = blank_cd_device();
        set_recording_mode(&mut dev, 3);

        // Build a lead-in frame: audio main data, Q with TNO 0, R-W
        // carrying one CD-TEXT pack
        let mut q = [0u8; 12];
        q[0] = 0x01; // ADR 1
        q[1] = 0x00; // TNO 0: lead-in
        let crc = msf::q_crc(&q[..10]);
        q[10..12].copy_from_slice(&crc.to_be_bytes());

        // Choose R-W bits so the first reshuffled byte has bit 7 set and
        // the pack number (byte 2) is 0
        let mut pw = crate::image::sector::interleave_q(&q);
        pw[0] |= 0x20;

        let mut payload = vec![0u8; 2352];
        payload.extend_from_slice(&pw);

        let recording = dev.recording.unwrap();
        let mut output = [0u8; 64];
        // Data block type 3: raw + raw P-W subchannel
        let page = dev.mode_pages.get_current_mut(0x05).unwrap();
        page[4] = 0x03;

        let mut io = CommandIo::new(&payload, &mut output);
        assert!(recording.write_sectors(&mut dev, &mut io, -500, 1));

        assert!(dev.open_session.is_some());
        assert_eq!(dev.leadin_cdtext_packs.len(), 1);
    }
}
