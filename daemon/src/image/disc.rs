//! In-memory disc model: sessions, tracks, fragments and layout.
//!
//! Layout values (session/track numbers, start sectors, fragment addresses)
//! are recomputed eagerly after every structural mutation, so accessors are
//! plain field reads. A `Session` also works standalone, which is how the
//! session-at-once cue sheet is modelled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::sector::{QContext, Sector};
use super::stream::ImageStream;
use super::{FragmentRole, ImageError, MediumType, SectorType, SessionType, SubchannelFormat};

/// Lead-out length of the first session
const FIRST_LEADOUT_LENGTH: i32 = 6750;
/// Lead-out length of subsequent sessions
const LATER_LEADOUT_LENGTH: i32 = 2250;
/// Lead-in gap preceding sessions after the first
const LATER_LEADIN_LENGTH: i32 = 4500;

// ============================================================================
// Fragment
// ============================================================================

/// Backing data of one fragment
pub enum FragmentData {
    /// No backing bytes; sectors read as zero-filled (loaded pregaps)
    Empty,
    /// Recorded sectors held in memory
    Sectors(Vec<Sector>),
    /// Slice of an image stream: `unit` main bytes plus `sub_len` subchannel
    /// bytes per sector starting at `offset`
    Stream {
        stream: Box<dyn ImageStream>,
        offset: u64,
        unit: usize,
        sub_len: usize,
    },
}

impl std::fmt::Debug for FragmentData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentData::Empty => write!(f, "Empty"),
            FragmentData::Sectors(v) => write!(f, "Sectors({})", v.len()),
            FragmentData::Stream { offset, unit, sub_len, .. } => {
                write!(f, "Stream {{ offset: {offset}, unit: {unit}, sub_len: {sub_len} }}")
            }
        }
    }
}

/// A contiguous span of sectors within a track
#[derive(Debug)]
pub struct Fragment {
    role: FragmentRole,
    /// Track-relative start address, assigned by relayout
    address: i32,
    length: i32,
    /// Main-channel data format tag; the cue parser stores the cue entry's
    /// format byte here
    main_format: i32,
    pub(crate) data: FragmentData,
}

impl Fragment {
    pub fn new(role: FragmentRole, data: FragmentData) -> Self {
        Self { role, address: 0, length: 0, main_format: 0, data }
    }

    pub fn role(&self) -> FragmentRole {
        self.role
    }

    pub fn address(&self) -> i32 {
        self.address
    }

    pub fn length(&self) -> i32 {
        self.length
    }

    pub fn set_length(&mut self, length: i32) {
        self.length = length;
    }

    pub fn main_format(&self) -> i32 {
        self.main_format
    }

    pub fn set_main_format(&mut self, format: i32) {
        self.main_format = format;
    }

    /// Whether the track-relative address falls into this fragment
    pub fn contains_address(&self, rel: i32) -> bool {
        rel >= self.address && rel < self.address + self.length
    }
}

// ============================================================================
// Track
// ============================================================================

/// One track: ordered fragments plus index points
#[derive(Debug)]
pub struct Track {
    number: i32,
    explicit_number: bool,
    session_number: i32,
    start_sector: i32,
    sector_type: SectorType,
    ctl: u8,
    isrc: Option<String>,
    flags: u8,
    /// Pregap length: the track-relative address of index point 1
    track_start: i32,
    /// Additional index points (track-start-relative addresses of index 2+)
    indices: Vec<i32>,
    fragments: Vec<Fragment>,
}

impl Track {
    pub fn new(sector_type: SectorType) -> Self {
        Self {
            number: 0,
            explicit_number: false,
            session_number: 0,
            start_sector: 0,
            sector_type,
            ctl: 0,
            isrc: None,
            flags: 0,
            track_start: 0,
            indices: Vec::new(),
            fragments: Vec::new(),
        }
    }

    pub fn number(&self) -> i32 {
        self.number
    }

    pub fn session_number(&self) -> i32 {
        self.session_number
    }

    /// Absolute start sector, pregap included
    pub fn start_sector(&self) -> i32 {
        self.start_sector
    }

    /// Total length in sectors (sum of fragments)
    pub fn length(&self) -> i32 {
        self.fragments.iter().map(|f| f.length).sum()
    }

    pub fn sector_type(&self) -> SectorType {
        self.sector_type
    }

    pub fn set_sector_type(&mut self, sector_type: SectorType) {
        self.sector_type = sector_type;
    }

    pub fn ctl(&self) -> u8 {
        self.ctl
    }

    pub fn set_ctl(&mut self, ctl: u8) {
        self.ctl = ctl;
    }

    /// ADR of the track's TOC entry; position data only
    pub fn adr(&self) -> u8 {
        1
    }

    pub fn isrc(&self) -> Option<&str> {
        self.isrc.as_deref()
    }

    pub fn set_isrc(&mut self, isrc: &str) {
        self.isrc = Some(isrc.to_string());
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    pub fn track_start(&self) -> i32 {
        self.track_start
    }

    pub fn set_track_start(&mut self, track_start: i32) {
        self.track_start = track_start;
    }

    pub fn add_index(&mut self, address: i32) {
        self.indices.push(address);
        self.indices.sort_unstable();
    }

    pub fn number_of_indices(&self) -> usize {
        self.indices.len()
    }

    pub fn indices(&self) -> &[i32] {
        &self.indices
    }

    pub fn number_of_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// Insert a fragment; `position` of -1 appends, otherwise inserts at
    /// that index
    pub fn add_fragment(&mut self, position: i32, fragment: Fragment) {
        if position < 0 || position as usize >= self.fragments.len() {
            self.fragments.push(fragment);
        } else {
            self.fragments.insert(position as usize, fragment);
        }
        self.relayout_fragments();
    }

    pub fn fragment_by_index(&self, index: usize) -> Option<&Fragment> {
        self.fragments.get(index)
    }

    /// Find the fragment containing the track-relative address
    pub fn fragment_by_address(&self, rel: i32) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.contains_address(rel))
    }

    pub fn fragment_mut(&mut self, index: usize) -> Option<&mut Fragment> {
        self.fragments.get_mut(index)
    }

    pub(crate) fn relayout_fragments(&mut self) {
        let mut address = 0;
        for fragment in &mut self.fragments {
            fragment.address = address;
            address += fragment.length;
        }
    }

    /// Index point at the track-relative address (0 inside the pregap)
    fn index_at(&self, rel: i32) -> u8 {
        if rel < self.track_start {
            return 0;
        }
        let data_rel = rel - self.track_start;
        1 + self.indices.iter().filter(|&&idx| idx <= data_rel).count() as u8
    }

    /// Q context for a sector at the track-relative address
    pub(crate) fn q_context(&self, rel: i32) -> QContext {
        let track_rel = if rel < self.track_start {
            // Relative time counts down through the pregap
            self.track_start - rel - 1
        } else {
            rel - self.track_start
        };
        QContext {
            ctl: self.ctl,
            tno: self.number as u8,
            index: self.index_at(rel),
            track_rel,
        }
    }

    /// Store a recorded sector; the address must fall into a recordable
    /// fragment (sequential append or overwrite)
    pub fn put_sector(&mut self, sector: Sector) -> Result<(), ImageError> {
        let rel = sector.address() - self.start_sector;
        let Some(pos) = self.fragments.iter().position(|f| f.contains_address(rel)) else {
            // Sequential recording may run off the last fragment's preset
            // length; grow it when it holds in-memory sectors
            return self.append_growing(sector, rel);
        };

        let fragment = &mut self.fragments[pos];
        let offset = (rel - fragment.address) as usize;
        match &mut fragment.data {
            FragmentData::Sectors(sectors) => {
                if offset < sectors.len() {
                    sectors[offset] = sector;
                } else {
                    while sectors.len() < offset {
                        sectors.push(Sector::new(
                            self.start_sector + fragment.address + sectors.len() as i32,
                            sector.sector_type(),
                        ));
                    }
                    sectors.push(sector);
                }
                Ok(())
            }
            FragmentData::Empty => Ok(()),
            FragmentData::Stream { .. } => Err(ImageError::InvalidSectorData(
                "cannot record into a stream-backed fragment".to_string(),
            )),
        }
    }

    fn append_growing(&mut self, sector: Sector, rel: i32) -> Result<(), ImageError> {
        let Some(fragment) = self.fragments.last_mut() else {
            return Err(ImageError::SectorOutOfRange(sector.address()));
        };
        let offset = rel - fragment.address;
        if offset < 0 {
            return Err(ImageError::SectorOutOfRange(sector.address()));
        }
        match &mut fragment.data {
            FragmentData::Sectors(sectors) => {
                while (sectors.len() as i32) < offset {
                    sectors.push(Sector::new(0, sector.sector_type()));
                }
                sectors.push(sector);
                fragment.length = fragment.length.max(offset + 1);
                Ok(())
            }
            _ => Err(ImageError::SectorOutOfRange(sector.address())),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One session: ordered tracks plus session-level metadata
#[derive(Debug)]
pub struct Session {
    session_number: i32,
    start_sector: i32,
    first_track: i32,
    session_type: SessionType,
    mcn: Option<String>,
    cdtext: Option<Vec<u8>>,
    leadout_length: i32,
    tracks: Vec<Track>,
}

impl Session {
    pub fn new(session_type: SessionType) -> Self {
        Self {
            session_number: 1,
            start_sector: 0,
            first_track: 1,
            session_type,
            mcn: None,
            cdtext: None,
            leadout_length: 0,
            tracks: Vec::new(),
        }
    }

    pub fn session_number(&self) -> i32 {
        self.session_number
    }

    pub fn set_session_number(&mut self, number: i32) {
        self.session_number = number;
    }

    pub fn start_sector(&self) -> i32 {
        self.start_sector
    }

    pub fn set_start_sector(&mut self, start: i32) {
        self.start_sector = start;
        self.relayout();
    }

    pub fn first_track(&self) -> i32 {
        self.first_track
    }

    pub fn set_first_track(&mut self, first_track: i32) {
        self.first_track = first_track;
        self.relayout();
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    pub fn set_session_type(&mut self, session_type: SessionType) {
        self.session_type = session_type;
    }

    pub fn mcn(&self) -> Option<&str> {
        self.mcn.as_deref()
    }

    pub fn set_mcn(&mut self, mcn: &str) {
        self.mcn = Some(mcn.to_string());
    }

    pub fn cdtext_data(&self) -> Option<&[u8]> {
        self.cdtext.as_deref()
    }

    pub fn set_cdtext_data(&mut self, data: Vec<u8>) {
        self.cdtext = Some(data);
    }

    pub fn leadout_length(&self) -> i32 {
        self.leadout_length
    }

    pub fn set_leadout_length(&mut self, length: i32) {
        self.leadout_length = length;
    }

    /// Length of all tracks, lead-out excluded
    pub fn tracks_length(&self) -> i32 {
        self.tracks.iter().map(Track::length).sum()
    }

    /// Session length: tracks plus lead-out
    pub fn length(&self) -> i32 {
        self.tracks_length() + self.leadout_length
    }

    /// Absolute start of the session's lead-out
    pub fn leadout_start(&self) -> i32 {
        self.start_sector + self.tracks_length()
    }

    pub fn number_of_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Append a track; numbering is assigned by relayout
    pub fn add_track_by_index(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.relayout();
        self.tracks.len() - 1
    }

    /// Insert a track with an explicit number, keeping tracks sorted
    pub fn add_track_by_number(&mut self, number: i32, mut track: Track) -> usize {
        track.number = number;
        track.explicit_number = true;
        let pos = self.tracks.partition_point(|t| t.number < number);
        self.tracks.insert(pos, track);
        self.relayout();
        pos
    }

    /// Track by list position; negative indices count from the end
    pub fn track_by_index(&self, index: i32) -> Option<&Track> {
        let len = self.tracks.len() as i32;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 {
            return None;
        }
        self.tracks.get(idx as usize)
    }

    pub fn track_by_number(&self, number: i32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.number == number)
    }

    pub fn track_by_number_mut(&mut self, number: i32) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.number == number)
    }

    /// Track containing the absolute address
    pub fn track_by_address(&self, address: i32) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|t| address >= t.start_sector && address < t.start_sector + t.length())
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    /// Recompute track numbering and start sectors from this session's own
    /// base fields (standalone use; a parent disc overrides these)
    pub(crate) fn relayout(&mut self) {
        let mut cursor = self.start_sector;
        let mut number = self.first_track;
        for track in &mut self.tracks {
            if !track.explicit_number {
                track.number = number;
            }
            number = track.number + 1;
            track.session_number = self.session_number;
            track.start_sector = cursor;
            track.relayout_fragments();
            cursor += track.length();
        }
    }
}

// ============================================================================
// DPM
// ============================================================================

/// Density-per-minute data: per-block angular position and sector density
#[derive(Debug, Clone)]
pub struct DpmTable {
    start: i32,
    resolution: i32,
    /// Cumulative angular position, in rotations, at each block start
    angles: Vec<f64>,
    /// Degrees per sector within each block
    densities: Vec<f64>,
}

impl DpmTable {
    /// Build a table from per-block densities (degrees per sector)
    pub fn from_densities(start: i32, resolution: i32, densities: Vec<f64>) -> Self {
        let mut angles = Vec::with_capacity(densities.len());
        let mut angle = 0.0;
        for &density in &densities {
            angles.push(angle);
            angle += density * resolution as f64 / 360.0;
        }
        Self { start, resolution, angles, densities }
    }

    /// Angular position (rotations) and density (degrees/sector) at an
    /// address, or None when the address is outside the sampled range
    pub fn data_for_sector(&self, address: i32) -> Option<(f64, f64)> {
        if address < self.start || self.resolution <= 0 {
            return None;
        }
        let block = ((address - self.start) / self.resolution) as usize;
        if block >= self.densities.len() {
            return None;
        }
        let within = (address - self.start) % self.resolution;
        let density = self.densities[block];
        let angle = self.angles[block] + density * within as f64 / 360.0;
        Some((angle, density))
    }
}

// ============================================================================
// Disc
// ============================================================================

/// A whole disc: layout root plus sessions
pub struct Disc {
    medium_type: MediumType,
    filenames: Vec<PathBuf>,
    layout_start: i32,
    first_session: i32,
    first_track: i32,
    sessions: Vec<Session>,
    dpm: Option<DpmTable>,
    structures: HashMap<(u8, u8), Vec<u8>>,
}

impl std::fmt::Debug for Disc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disc")
            .field("medium_type", &self.medium_type)
            .field("filenames", &self.filenames)
            .field("layout_start", &self.layout_start)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl Disc {
    pub fn new(medium_type: MediumType) -> Self {
        Self {
            medium_type,
            filenames: Vec::new(),
            layout_start: 0,
            first_session: 1,
            first_track: 1,
            sessions: Vec::new(),
            dpm: None,
            structures: HashMap::new(),
        }
    }

    pub fn medium_type(&self) -> MediumType {
        self.medium_type
    }

    pub fn set_medium_type(&mut self, medium_type: MediumType) {
        self.medium_type = medium_type;
    }

    pub fn filenames(&self) -> &[PathBuf] {
        &self.filenames
    }

    pub fn set_filename(&mut self, path: &Path) {
        self.filenames = vec![path.to_path_buf()];
    }

    pub fn set_filenames(&mut self, paths: Vec<PathBuf>) {
        self.filenames = paths;
    }

    pub fn layout_start_sector(&self) -> i32 {
        self.layout_start
    }

    pub fn set_layout_start_sector(&mut self, start: i32) {
        self.layout_start = start;
        self.relayout();
    }

    pub fn first_session(&self) -> i32 {
        self.first_session
    }

    pub fn first_track(&self) -> i32 {
        self.first_track
    }

    /// Disc length from layout start to the end of the last lead-out
    pub fn layout_length(&self) -> i32 {
        let mut length = 0;
        for (i, session) in self.sessions.iter().enumerate() {
            if i > 0 {
                length += LATER_LEADIN_LENGTH;
            }
            length += session.length();
        }
        length
    }

    pub fn number_of_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn number_of_tracks(&self) -> usize {
        self.sessions.iter().map(Session::number_of_tracks).sum()
    }

    /// Append a session and return its index
    pub fn add_session(&mut self, mut session: Session) -> usize {
        if session.leadout_length == 0 {
            session.leadout_length = if self.sessions.is_empty() {
                FIRST_LEADOUT_LENGTH
            } else {
                LATER_LEADOUT_LENGTH
            };
        }
        self.sessions.push(session);
        self.relayout();
        self.sessions.len() - 1
    }

    /// Session by list position; negative indices count from the end
    pub fn session_by_index(&self, index: i32) -> Option<&Session> {
        let len = self.sessions.len() as i32;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 {
            return None;
        }
        self.sessions.get(idx as usize)
    }

    pub fn session_by_number(&self, number: i32) -> Option<&Session> {
        self.sessions.iter().find(|s| s.session_number == number)
    }

    pub fn session(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn session_mut(&mut self, index: usize) -> Option<&mut Session> {
        self.sessions.get_mut(index)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Global track lookup by number
    pub fn track_by_number(&self, number: i32) -> Option<&Track> {
        self.sessions.iter().find_map(|s| s.track_by_number(number))
    }

    /// Global track lookup by list position across sessions; negative
    /// indices count from the end
    pub fn track_by_index(&self, index: i32) -> Option<&Track> {
        let total = self.number_of_tracks() as i32;
        let idx = if index < 0 { total + index } else { index };
        if idx < 0 {
            return None;
        }
        let mut remaining = idx as usize;
        for session in &self.sessions {
            if remaining < session.number_of_tracks() {
                return session.tracks.get(remaining);
            }
            remaining -= session.number_of_tracks();
        }
        None
    }

    /// Track containing the absolute address
    pub fn track_by_address(&self, address: i32) -> Option<&Track> {
        self.sessions.iter().find_map(|s| s.track_by_address(address))
    }

    fn locate_track(&self, address: i32) -> Option<(usize, usize)> {
        for (sidx, session) in self.sessions.iter().enumerate() {
            for (tidx, track) in session.tracks.iter().enumerate() {
                if address >= track.start_sector && address < track.start_sector + track.length() {
                    return Some((sidx, tidx));
                }
            }
        }
        None
    }

    pub fn track_mut(&mut self, session: usize, track: usize) -> Option<&mut Track> {
        self.sessions.get_mut(session)?.tracks.get_mut(track)
    }

    /// Materialize the sector at an absolute address
    pub fn get_sector(&mut self, address: i32) -> Result<Sector, ImageError> {
        let (sidx, tidx) =
            self.locate_track(address).ok_or(ImageError::SectorOutOfRange(address))?;

        let track = &self.sessions[sidx].tracks[tidx];
        let rel = address - track.start_sector;
        let q_context = track.q_context(rel);
        let sector_type = track.sector_type;
        let fidx = track
            .fragments
            .iter()
            .position(|f| f.contains_address(rel))
            .ok_or(ImageError::SectorOutOfRange(address))?;

        let fragment = &mut self.sessions[sidx].tracks[tidx].fragments[fidx];
        let in_frag = (rel - fragment.address) as u64;

        let mut sector = match &mut fragment.data {
            FragmentData::Empty => Sector::new(address, sector_type),
            FragmentData::Sectors(sectors) => sectors
                .get(in_frag as usize)
                .cloned()
                .unwrap_or_else(|| Sector::new(address, sector_type)),
            FragmentData::Stream { stream, offset, unit, sub_len } => {
                let frame = *offset + in_frag * (*unit + *sub_len) as u64;
                let mut main = vec![0u8; *unit];
                stream.read_exact_at(frame, &mut main)?;

                let feed_type = if *unit == 2352 { SectorType::Raw } else { sector_type };
                let (sub_format, sub) = if *sub_len == 96 {
                    let mut sub = vec![0u8; 96];
                    stream.read_exact_at(frame + *unit as u64, &mut sub)?;
                    (SubchannelFormat::Pw, sub)
                } else {
                    (SubchannelFormat::None, Vec::new())
                };

                Sector::feed_data(address, feed_type, &main, sub_format, &sub, Default::default())?
            }
        };

        sector.set_q_context(q_context);
        Ok(sector)
    }

    /// Store a recorded sector into the given track and refresh the layout
    pub fn put_sector(
        &mut self,
        session: usize,
        track: usize,
        sector: Sector,
    ) -> Result<(), ImageError> {
        let track_ref = self
            .sessions
            .get_mut(session)
            .and_then(|s| s.tracks.get_mut(track))
            .ok_or(ImageError::NoSuchTrack)?;
        track_ref.put_sector(sector)?;
        self.relayout();
        Ok(())
    }

    pub fn dpm(&self) -> Option<&DpmTable> {
        self.dpm.as_ref()
    }

    pub fn set_dpm(&mut self, dpm: DpmTable) {
        self.dpm = Some(dpm);
    }

    /// DPM angle/density lookup used by the delay model
    pub fn dpm_data_for_sector(&self, address: i32) -> Option<(f64, f64)> {
        self.dpm.as_ref()?.data_for_sector(address)
    }

    /// Disc structure supplied by the image, if any
    pub fn disc_structure(&self, layer: u8, format: u8) -> Option<&[u8]> {
        self.structures.get(&(layer, format)).map(Vec::as_slice)
    }

    pub fn set_disc_structure(&mut self, layer: u8, format: u8, data: Vec<u8>) {
        self.structures.insert((layer, format), data);
    }

    /// Recompute all layout-derived values
    pub fn relayout(&mut self) {
        let mut cursor = self.layout_start;
        let mut track_number = self.first_track;

        for (i, session) in self.sessions.iter_mut().enumerate() {
            if i > 0 {
                cursor += LATER_LEADIN_LENGTH;
            }
            session.session_number = self.first_session + i as i32;
            session.start_sector = cursor;
            session.first_track = track_number;

            for track in &mut session.tracks {
                if !track.explicit_number {
                    track.number = track_number;
                }
                track_number = track.number + 1;
                track.session_number = session.session_number;
                track.start_sector = cursor;
                track.relayout_fragments();
                cursor += track.length();
            }

            cursor += session.leadout_length;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::stream::MemoryStream;

    fn single_track_disc(num_sectors: i32) -> Disc {
        // 2048-byte cooked image stream; the first 150 sectors come from a
        // generated pregap
        let data = vec![0u8; (num_sectors as usize) * 2048];
        let mut disc = Disc::new(MediumType::Cd);
        disc.layout_start = -150;

        let mut session = Session::new(SessionType::Cdrom);
        let mut track = Track::new(SectorType::Mode1);
        track.set_ctl(0x4);
        track.set_track_start(150);

        let mut pregap = Fragment::new(FragmentRole::Pregap, FragmentData::Empty);
        pregap.set_length(150);
        track.add_fragment(-1, pregap);

        let mut frag = Fragment::new(
            FragmentRole::Data,
            FragmentData::Stream {
                stream: Box::new(MemoryStream::new(data)),
                offset: 0,
                unit: 2048,
                sub_len: 0,
            },
        );
        frag.set_length(num_sectors);
        track.add_fragment(-1, frag);

        session.add_track_by_index(track);
        disc.add_session(session);
        disc
    }

    #[test]
    fn test_single_track_layout() {
        let disc = single_track_disc(1000);
        assert_eq!(disc.number_of_sessions(), 1);
        assert_eq!(disc.number_of_tracks(), 1);

        let track = disc.track_by_number(1).unwrap();
        assert_eq!(track.start_sector(), -150);
        assert_eq!(track.length(), 1150);
        assert_eq!(track.track_start(), 150);

        let session = disc.session_by_index(-1).unwrap();
        assert_eq!(session.leadout_start(), 1000);
        assert_eq!(session.session_number(), 1);
        assert_eq!(disc.layout_length(), 1150 + 6750);
    }

    #[test]
    fn test_get_sector_pregap_and_data() {
        let mut disc = single_track_disc(100);

        // Pregap sector is zero-filled Mode 1
        let mut sector = disc.get_sector(-150).unwrap();
        assert_eq!(sector.sector_type(), SectorType::Mode1);
        assert!(sector.data().iter().all(|&b| b == 0));

        // Q context: index 0, relative time counting down
        let q = sector.subchannel(crate::image::SubchannelFormat::Q);
        assert_eq!(q[2], 0x00); // index 0
        assert_eq!(q[1], 0x01); // track 1

        let mut sector = disc.get_sector(0).unwrap();
        let q = sector.subchannel(crate::image::SubchannelFormat::Q);
        assert_eq!(q[2], 0x01); // index 1
        assert_eq!(&q[3..6], &[0, 0, 0]); // relative 00:00:00

        assert!(disc.get_sector(100).is_err());
    }

    #[test]
    fn test_multisession_layout() {
        let mut disc = single_track_disc(1000);

        let mut session = Session::new(SessionType::Cdrom);
        let mut track = Track::new(SectorType::Mode1);
        let mut frag = Fragment::new(FragmentRole::Data, FragmentData::Sectors(Vec::new()));
        frag.set_length(500);
        track.add_fragment(-1, frag);
        session.add_track_by_index(track);
        disc.add_session(session);

        assert_eq!(disc.number_of_sessions(), 2);
        let second = disc.session_by_index(1).unwrap();
        assert_eq!(second.session_number(), 2);
        // 1000 (leadout start) + 6750 (leadout) + 4500 (leadin)
        assert_eq!(second.start_sector(), 1000 + 6750 + 4500);
        assert_eq!(second.leadout_length(), 2250);

        let track2 = disc.track_by_number(2).unwrap();
        assert_eq!(track2.session_number(), 2);
    }

    #[test]
    fn test_standalone_session_explicit_numbers() {
        let mut session = Session::new(SessionType::Cdrom);
        session.set_session_number(2);
        session.set_start_sector(300);
        session.set_first_track(5);

        let mut track = Track::new(SectorType::Audio);
        let mut frag = Fragment::new(FragmentRole::Data, FragmentData::Empty);
        frag.set_length(100);
        track.add_fragment(-1, frag);
        session.add_track_by_number(5, track);

        let mut track = Track::new(SectorType::Audio);
        let mut frag = Fragment::new(FragmentRole::Data, FragmentData::Empty);
        frag.set_length(50);
        track.add_fragment(-1, frag);
        session.add_track_by_number(6, track);

        let t5 = session.track_by_number(5).unwrap();
        assert_eq!(t5.start_sector(), 300);
        let t6 = session.track_by_number(6).unwrap();
        assert_eq!(t6.start_sector(), 400);
        assert_eq!(session.track_by_address(425).unwrap().number(), 6);
    }

    #[test]
    fn test_put_sector_grows_fragment() {
        let mut disc = Disc::new(MediumType::Cd);
        let mut session = Session::new(SessionType::Cdrom);
        let mut track = Track::new(SectorType::Mode1);
        track.add_fragment(-1, Fragment::new(FragmentRole::Data, FragmentData::Sectors(Vec::new())));
        session.add_track_by_index(track);
        disc.add_session(session);

        for address in 0..10 {
            let sector = Sector::new(address, SectorType::Mode1);
            disc.put_sector(0, 0, sector).unwrap();
        }

        assert_eq!(disc.track_by_number(1).unwrap().length(), 10);
        let mut sector = disc.get_sector(5).unwrap();
        assert_eq!(sector.sector_type(), SectorType::Mode1);
    }

    #[test]
    fn test_dpm_lookup() {
        let dpm = DpmTable::from_densities(0, 100, vec![1.0, 2.0, 4.0]);
        let (angle0, d0) = dpm.data_for_sector(0).unwrap();
        assert_eq!(angle0, 0.0);
        assert_eq!(d0, 1.0);

        // End of first block: 100 sectors at 1 degree each
        let (angle1, d1) = dpm.data_for_sector(100).unwrap();
        assert!((angle1 - 100.0 / 360.0).abs() < 1e-9);
        assert_eq!(d1, 2.0);

        assert!(dpm.data_for_sector(300).is_none());
        assert!(dpm.data_for_sector(-1).is_none());
    }
}
