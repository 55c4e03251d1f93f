//! Sector assembly and disassembly.
//!
//! A `Sector` owns one raw 2352-byte frame plus its subchannel. Parts that
//! were not supplied by the caller (sync, header, subheader, EDC/ECC, Q
//! subchannel) are synthesized on first access from the sector's address
//! and track context.

use super::ecc::{self, RAW_SECTOR_SIZE, SYNC_PATTERN};
use super::msf::{self, hex_to_bcd};
use super::{IgnoreFields, ImageError, SectorType, SubchannelFormat};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct Present: u32 {
        const SYNC       = 1 << 0;
        const HEADER     = 1 << 1;
        const SUBHEADER  = 1 << 2;
        const DATA       = 1 << 3;
        const EDC_ECC    = 1 << 4;
        const SUBCHANNEL = 1 << 5;
    }
}

/// Track-derived context used to synthesize the Q subchannel
#[derive(Debug, Clone, Copy, Default)]
pub struct QContext {
    /// Control nibble of the owning track
    pub ctl: u8,
    /// Track number (1..=99)
    pub tno: u8,
    /// Index point at this address (0 = pregap)
    pub index: u8,
    /// Track-relative address (counts down inside the pregap)
    pub track_rel: i32,
}

/// One 2352-byte frame plus 96 bytes of subchannel
#[derive(Debug, Clone)]
pub struct Sector {
    address: i32,
    sector_type: SectorType,
    raw: Box<[u8; RAW_SECTOR_SIZE]>,
    subchannel_pw: [u8; 96],
    present: Present,
    q_context: Option<QContext>,
}

impl Sector {
    /// Create an empty sector of the given type; parts are synthesized on
    /// access
    pub fn new(address: i32, sector_type: SectorType) -> Self {
        Self {
            address,
            sector_type,
            raw: Box::new([0u8; RAW_SECTOR_SIZE]),
            subchannel_pw: [0u8; 96],
            present: Present::empty(),
            q_context: None,
        }
    }

    pub fn address(&self) -> i32 {
        self.address
    }

    pub fn sector_type(&self) -> SectorType {
        self.sector_type
    }

    /// Attach the track context used for Q subchannel synthesis
    pub fn set_q_context(&mut self, ctx: QContext) {
        self.q_context = Some(ctx);
    }

    // ------------------------------------------------------------------
    // Feeding
    // ------------------------------------------------------------------

    /// Build a sector from host-supplied bytes. `main` is interpreted
    /// according to `sector_type` and its length; `subchannel` according to
    /// `sub_format`. Fields flagged in `ignore` are regenerated rather than
    /// taken from the input.
    pub fn feed_data(
        address: i32,
        sector_type: SectorType,
        main: &[u8],
        sub_format: SubchannelFormat,
        subchannel: &[u8],
        ignore: IgnoreFields,
    ) -> Result<Self, ImageError> {
        let mut sector = Self::new(address, sector_type);
        sector.feed_main(sector_type, main)?;

        if sub_format != SubchannelFormat::None {
            if subchannel.len() < sub_format.len() {
                return Err(ImageError::InvalidSectorData(format!(
                    "subchannel buffer too short: {} < {}",
                    subchannel.len(),
                    sub_format.len()
                )));
            }
            match sub_format {
                SubchannelFormat::Q => {
                    let mut q = [0u8; 12];
                    q.copy_from_slice(&subchannel[..12]);
                    sector.subchannel_pw = interleave_q(&q);
                }
                SubchannelFormat::Rw | SubchannelFormat::Pw => {
                    sector.subchannel_pw.copy_from_slice(&subchannel[..96]);
                }
                SubchannelFormat::None => unreachable!(),
            }
            sector.present |= Present::SUBCHANNEL;
        }

        if ignore.contains(IgnoreFields::SYNC) {
            sector.present.remove(Present::SYNC);
        }
        if ignore.contains(IgnoreFields::HEADER) {
            sector.present.remove(Present::HEADER);
        }
        if ignore.contains(IgnoreFields::EDC_ECC) {
            sector.present.remove(Present::EDC_ECC);
        }

        Ok(sector)
    }

    fn feed_main(&mut self, sector_type: SectorType, main: &[u8]) -> Result<(), ImageError> {
        use SectorType::*;

        match (sector_type, main.len()) {
            (Audio, 2352) => {
                self.raw.copy_from_slice(main);
                self.present |= Present::DATA;
            }
            (Raw, 2352) => {
                self.raw.copy_from_slice(main);
                self.sector_type = detect_raw_type(&self.raw);
                self.present |=
                    Present::SYNC | Present::HEADER | Present::SUBHEADER | Present::DATA | Present::EDC_ECC;
            }
            (RawScrambled, 2352) => {
                self.raw.copy_from_slice(main);
                let mut unscrambled = *self.raw;
                ecc::scramble(&mut unscrambled);
                if unscrambled[..12] == SYNC_PATTERN {
                    *self.raw = unscrambled;
                    self.sector_type = detect_raw_type(&self.raw);
                } else {
                    // Audio frames are never scrambled
                    self.sector_type = Audio;
                }
                self.present |=
                    Present::SYNC | Present::HEADER | Present::SUBHEADER | Present::DATA | Present::EDC_ECC;
            }
            (Mode0, 2336) => {
                self.raw[16..2352].copy_from_slice(main);
                self.present |= Present::DATA;
            }
            (Mode1, 2048) => {
                self.raw[16..2064].copy_from_slice(main);
                self.present |= Present::DATA;
            }
            (Mode1, 2352) => {
                self.raw.copy_from_slice(main);
                self.present |= Present::SYNC | Present::HEADER | Present::DATA | Present::EDC_ECC;
            }
            (Mode2, 2336) => {
                self.raw[16..2352].copy_from_slice(main);
                self.present |= Present::DATA;
            }
            (Mode2, 2352) => {
                self.raw.copy_from_slice(main);
                self.present |= Present::SYNC | Present::HEADER | Present::DATA | Present::EDC_ECC;
            }
            (Mode2Form1, 2048) => {
                self.raw[24..2072].copy_from_slice(main);
                self.present |= Present::DATA;
            }
            (Mode2Form1, 2056) => {
                self.raw[16..2072].copy_from_slice(main);
                self.present |= Present::SUBHEADER | Present::DATA;
            }
            (Mode2Form1, 2352) => {
                self.raw.copy_from_slice(main);
                self.present |= Present::SYNC
                    | Present::HEADER
                    | Present::SUBHEADER
                    | Present::DATA
                    | Present::EDC_ECC;
            }
            (Mode2Form2, 2324) => {
                self.raw[24..2348].copy_from_slice(main);
                self.present |= Present::DATA;
            }
            (Mode2Form2, 2332) => {
                self.raw[16..2348].copy_from_slice(main);
                self.present |= Present::SUBHEADER | Present::DATA;
            }
            (Mode2Form2, 2352) => {
                self.raw.copy_from_slice(main);
                self.present |= Present::SYNC
                    | Present::HEADER
                    | Present::SUBHEADER
                    | Present::DATA
                    | Present::EDC_ECC;
            }
            (Mode2Mixed, 2332) => {
                self.raw[16..2348].copy_from_slice(main);
                self.present |= Present::SUBHEADER | Present::DATA;
            }
            (Mode2Mixed, 2336) => {
                self.raw[16..2352].copy_from_slice(main);
                self.present |= Present::SUBHEADER | Present::DATA | Present::EDC_ECC;
            }
            (Mode2Mixed, 2352) => {
                self.raw.copy_from_slice(main);
                self.present |= Present::SYNC
                    | Present::HEADER
                    | Present::SUBHEADER
                    | Present::DATA
                    | Present::EDC_ECC;
            }
            (kind, len) => {
                return Err(ImageError::InvalidSectorData(format!(
                    "main data length {len} does not fit sector type {kind:?}"
                )));
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Part synthesis
    // ------------------------------------------------------------------

    fn ensure_sync(&mut self) {
        if self.present.contains(Present::SYNC) || self.sector_type == SectorType::Audio {
            return;
        }
        self.raw[..12].copy_from_slice(&SYNC_PATTERN);
        self.present |= Present::SYNC;
    }

    fn ensure_header(&mut self) {
        if self.present.contains(Present::HEADER) || self.sector_type == SectorType::Audio {
            return;
        }
        let (m, s, f) = msf::lba_to_msf(self.address, true);
        self.raw[12] = hex_to_bcd(m);
        self.raw[13] = hex_to_bcd(s);
        self.raw[14] = hex_to_bcd(f);
        self.raw[15] = match self.sector_type {
            SectorType::Mode0 => 0,
            SectorType::Mode1 => 1,
            _ => 2,
        };
        self.present |= Present::HEADER;
    }

    fn ensure_subheader(&mut self) {
        if self.present.contains(Present::SUBHEADER) || !self.has_subheader() {
            return;
        }
        self.raw[16..24].fill(0);
        if self.sector_type == SectorType::Mode2Form2 {
            // Submode form bit, mirrored in the copy
            self.raw[18] = 0x20;
            self.raw[22] = 0x20;
        }
        self.present |= Present::SUBHEADER;
    }

    fn ensure_edc_ecc(&mut self) {
        if self.present.contains(Present::EDC_ECC) {
            return;
        }
        self.ensure_sync();
        self.ensure_header();
        self.ensure_subheader();

        match self.sector_type {
            SectorType::Mode1 => {
                let edc = ecc::edc_compute(&self.raw[..2064]);
                self.raw[2064..2068].copy_from_slice(&edc.to_le_bytes());
                self.raw[2068..2076].fill(0);
                ecc::ecc_generate(&mut self.raw, false);
            }
            SectorType::Mode2Form1 => {
                let edc = ecc::edc_compute(&self.raw[16..2072]);
                self.raw[2072..2076].copy_from_slice(&edc.to_le_bytes());
                ecc::ecc_generate(&mut self.raw, true);
            }
            SectorType::Mode2Form2 => {
                let edc = ecc::edc_compute(&self.raw[16..2348]);
                self.raw[2348..2352].copy_from_slice(&edc.to_le_bytes());
            }
            _ => {}
        }
        self.present |= Present::EDC_ECC;
    }

    fn has_subheader(&self) -> bool {
        matches!(
            self.sector_type,
            SectorType::Mode2Form1 | SectorType::Mode2Form2 | SectorType::Mode2Mixed
        )
    }

    // ------------------------------------------------------------------
    // Part accessors
    // ------------------------------------------------------------------

    /// 12-byte sync pattern; empty for audio sectors
    pub fn sync(&mut self) -> &[u8] {
        if self.sector_type == SectorType::Audio {
            return &[];
        }
        self.ensure_sync();
        &self.raw[..12]
    }

    /// 4-byte header; empty for audio sectors
    pub fn header(&mut self) -> &[u8] {
        if self.sector_type == SectorType::Audio {
            return &[];
        }
        self.ensure_header();
        &self.raw[12..16]
    }

    /// Install a subheader. A 4-byte value is mirrored into both copies of
    /// the 8-byte field.
    pub fn set_subheader(&mut self, data: &[u8]) {
        if !self.has_subheader() {
            return;
        }
        let len = data.len().min(8);
        self.raw[16..16 + len].copy_from_slice(&data[..len]);
        if len == 4 {
            self.raw[20..24].copy_from_slice(&data[..4]);
        }
        self.present |= Present::SUBHEADER;
    }

    /// 8-byte XA subheader; empty when the sector type carries none
    pub fn subheader(&mut self) -> &[u8] {
        if !self.has_subheader() {
            return &[];
        }
        self.ensure_subheader();
        &self.raw[16..24]
    }

    /// User data span for this sector type
    pub fn data(&mut self) -> &[u8] {
        match self.sector_type {
            SectorType::Audio | SectorType::Raw | SectorType::RawScrambled => &self.raw[..],
            SectorType::Mode0 | SectorType::Mode2 => &self.raw[16..2352],
            SectorType::Mode1 => &self.raw[16..2064],
            SectorType::Mode2Form1 => &self.raw[24..2072],
            SectorType::Mode2Form2 | SectorType::Mode2Mixed => &self.raw[24..2348],
        }
    }

    /// EDC/ECC span; empty for types without layered error correction
    pub fn edc_ecc(&mut self) -> &[u8] {
        match self.sector_type {
            SectorType::Mode1 => {
                self.ensure_edc_ecc();
                &self.raw[2064..2352]
            }
            SectorType::Mode2Form1 => {
                self.ensure_edc_ecc();
                &self.raw[2072..2352]
            }
            SectorType::Mode2Form2 => {
                self.ensure_edc_ecc();
                &self.raw[2348..2352]
            }
            _ => &[],
        }
    }

    /// Full raw 2352-byte frame with all parts synthesized
    pub fn raw_frame(&mut self) -> &[u8; RAW_SECTOR_SIZE] {
        self.ensure_edc_ecc();
        &self.raw
    }

    /// Subchannel in the requested layout
    pub fn subchannel(&mut self, format: SubchannelFormat) -> Vec<u8> {
        match format {
            SubchannelFormat::None => Vec::new(),
            SubchannelFormat::Q => {
                let q = if self.present.contains(Present::SUBCHANNEL) {
                    deinterleave_q(&self.subchannel_pw)
                } else {
                    self.generate_q()
                };
                let mut out = vec![0u8; 16];
                out[..12].copy_from_slice(&q);
                out
            }
            SubchannelFormat::Pw | SubchannelFormat::Rw => {
                if !self.present.contains(Present::SUBCHANNEL) {
                    let q = self.generate_q();
                    self.subchannel_pw = interleave_q(&q);
                    self.present |= Present::SUBCHANNEL;
                }
                self.subchannel_pw.to_vec()
            }
        }
    }

    fn generate_q(&self) -> [u8; 12] {
        let ctx = self.q_context.unwrap_or_default();
        let mut q = [0u8; 12];

        q[0] = (ctx.ctl << 4) | 0x01;
        q[1] = hex_to_bcd(ctx.tno);
        q[2] = hex_to_bcd(ctx.index);

        let (m, s, f) = msf::lba_to_msf(ctx.track_rel, false);
        q[3] = hex_to_bcd(m);
        q[4] = hex_to_bcd(s);
        q[5] = hex_to_bcd(f);

        let (m, s, f) = msf::lba_to_msf(self.address, true);
        q[7] = hex_to_bcd(m);
        q[8] = hex_to_bcd(s);
        q[9] = hex_to_bcd(f);

        let crc = msf::q_crc(&q[..10]);
        q[10..12].copy_from_slice(&crc.to_be_bytes());
        q
    }

    /// Verify the layered error correction of Mode 1 / Mode 2 Form 1
    /// sectors. Types without LEC always verify.
    pub fn verify_lec(&mut self) -> bool {
        match self.sector_type {
            SectorType::Mode1 => {
                if !self.present.contains(Present::EDC_ECC) {
                    return true;
                }
                self.ensure_header();
                let stored = u32::from_le_bytes(self.raw[2064..2068].try_into().unwrap());
                ecc::edc_compute(&self.raw[..2064]) == stored
            }
            SectorType::Mode2Form1 => {
                if !self.present.contains(Present::EDC_ECC) {
                    return true;
                }
                let stored = u32::from_le_bytes(self.raw[2072..2076].try_into().unwrap());
                ecc::edc_compute(&self.raw[16..2072]) == stored
            }
            _ => true,
        }
    }
}

/// Determine the concrete type of an unscrambled raw frame
fn detect_raw_type(raw: &[u8; RAW_SECTOR_SIZE]) -> SectorType {
    if raw[..12] != SYNC_PATTERN {
        return SectorType::Audio;
    }
    match raw[15] {
        0 => SectorType::Mode0,
        1 => SectorType::Mode1,
        2 => {
            // XA subheader submode, byte repeated at 20..24
            if raw[18] & 0x20 != 0 {
                SectorType::Mode2Form2
            } else {
                SectorType::Mode2Form1
            }
        }
        _ => SectorType::Raw,
    }
}

/// Spread the 12 cooked Q bytes over bit 6 of the 96 raw P-W bytes
pub fn interleave_q(q: &[u8; 12]) -> [u8; 96] {
    let mut pw = [0u8; 96];
    for bit in 0..96 {
        if q[bit / 8] & (0x80 >> (bit % 8)) != 0 {
            pw[bit] |= 0x40;
        }
    }
    pw
}

/// Collect bit 6 of the 96 raw P-W bytes back into 12 cooked Q bytes
pub fn deinterleave_q(pw: &[u8; 96]) -> [u8; 12] {
    let mut q = [0u8; 12];
    for bit in 0..96 {
        if pw[bit] & 0x40 != 0 {
            q[bit / 8] |= 0x80 >> (bit % 8);
        }
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode1_synthesis_roundtrip() {
        let data = vec![0x5Au8; 2048];
        let mut sector = Sector::feed_data(
            16,
            SectorType::Mode1,
            &data,
            SubchannelFormat::None,
            &[],
            IgnoreFields::empty(),
        )
        .unwrap();

        assert_eq!(sector.sync(), &SYNC_PATTERN);
        // LBA 16 absolute = 00:02:16
        assert_eq!(sector.header(), &[0x00, 0x02, 0x16, 0x01]);
        assert_eq!(sector.data().len(), 2048);
        assert_eq!(sector.edc_ecc().len(), 288);
        assert!(sector.verify_lec());

        let raw = sector.raw_frame().to_vec();

        // Re-feeding the synthesized frame as raw must detect Mode 1 and
        // verify cleanly
        let mut refed = Sector::feed_data(
            16,
            SectorType::Raw,
            &raw,
            SubchannelFormat::None,
            &[],
            IgnoreFields::empty(),
        )
        .unwrap();
        assert_eq!(refed.sector_type(), SectorType::Mode1);
        assert!(refed.verify_lec());
    }

    #[test]
    fn test_corrupted_mode1_fails_lec() {
        let data = vec![0x11u8; 2048];
        let mut sector = Sector::feed_data(
            100,
            SectorType::Mode1,
            &data,
            SubchannelFormat::None,
            &[],
            IgnoreFields::empty(),
        )
        .unwrap();
        let mut raw = sector.raw_frame().to_vec();
        raw[1000] ^= 0xFF;

        let mut bad = Sector::feed_data(
            100,
            SectorType::Raw,
            &raw,
            SubchannelFormat::None,
            &[],
            IgnoreFields::empty(),
        )
        .unwrap();
        assert!(!bad.verify_lec());
    }

    #[test]
    fn test_scrambled_feed_detects_type() {
        let data = vec![0x77u8; 2048];
        let mut sector = Sector::feed_data(
            0,
            SectorType::Mode1,
            &data,
            SubchannelFormat::None,
            &[],
            IgnoreFields::empty(),
        )
        .unwrap();
        let mut raw: [u8; RAW_SECTOR_SIZE] = *sector.raw_frame();
        ecc::scramble(&mut raw);

        let scrambled = Sector::feed_data(
            0,
            SectorType::RawScrambled,
            &raw,
            SubchannelFormat::None,
            &[],
            IgnoreFields::empty(),
        )
        .unwrap();
        assert_eq!(scrambled.sector_type(), SectorType::Mode1);
    }

    #[test]
    fn test_audio_frames_pass_through() {
        let mut frame = vec![0u8; 2352];
        for (i, byte) in frame.iter_mut().enumerate() {
            *byte = (i % 199) as u8;
        }
        let mut sector = Sector::feed_data(
            0,
            SectorType::RawScrambled,
            &frame,
            SubchannelFormat::None,
            &[],
            IgnoreFields::empty(),
        )
        .unwrap();
        assert_eq!(sector.sector_type(), SectorType::Audio);
        assert_eq!(sector.data(), &frame[..]);
        assert!(sector.sync().is_empty());
    }

    #[test]
    fn test_generated_q_subchannel() {
        let mut sector = Sector::new(0, SectorType::Mode1);
        sector.set_q_context(QContext { ctl: 0x4, tno: 1, index: 1, track_rel: 0 });

        let q = sector.subchannel(SubchannelFormat::Q);
        assert_eq!(q.len(), 16);
        assert_eq!(q[0], 0x41);
        assert_eq!(q[1], 0x01);
        assert_eq!(q[2], 0x01);
        // Absolute MSF of LBA 0 is 00:02:00 in BCD
        assert_eq!(&q[7..10], &[0x00, 0x02, 0x00]);
        // CRC is consistent
        let crc = msf::q_crc(&q[..10]);
        assert_eq!(&q[10..12], &crc.to_be_bytes());
    }

    #[test]
    fn test_q_interleave_roundtrip() {
        let mut q = [0u8; 12];
        q[0] = 0x41;
        q[1] = 0x01;
        q[9] = 0x37;
        let pw = interleave_q(&q);
        assert_eq!(deinterleave_q(&pw), q);
    }

    #[test]
    fn test_fed_q_subchannel_preserved() {
        let mut q16 = vec![0u8; 16];
        q16[0] = 0x21; // CTL 2, ADR 1
        q16[1] = 0x05;
        let mut sector = Sector::feed_data(
            200,
            SectorType::Audio,
            &vec![0u8; 2352],
            SubchannelFormat::Q,
            &q16,
            IgnoreFields::empty(),
        )
        .unwrap();
        let back = sector.subchannel(SubchannelFormat::Q);
        assert_eq!(&back[..12], &q16[..12]);
    }
}
