//! Feature and profile store, plus the per-profile write-speed descriptors.
//!
//! Features are held sorted by code. Switching profiles clears the current
//! bit on every non-persistent feature, re-sets it for the new profile's
//! active set, maintains the profile-list entries inside feature 0x0000,
//! and swaps the write-speed descriptor lists (both the GET PERFORMANCE
//! list and the copies inside mode page 0x2A).

use tracing::warn;

use super::mode_pages::{capabilities, ModePageStore};

/// MMC profile identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    None,
    CdRom,
    CdR,
    DvdRom,
    DvdPlusR,
    BdRom,
    BdRSrm,
}

impl Profile {
    /// Profile code on the wire
    pub fn code(&self) -> u16 {
        match self {
            Profile::None => 0x0000,
            Profile::CdRom => 0x0008,
            Profile::CdR => 0x0009,
            Profile::DvdRom => 0x0010,
            Profile::DvdPlusR => 0x001B,
            Profile::BdRom => 0x0040,
            Profile::BdRSrm => 0x0041,
        }
    }

    pub fn is_dvd(&self) -> bool {
        matches!(self, Profile::DvdRom | Profile::DvdPlusR)
    }

    pub fn is_bd(&self) -> bool {
        matches!(self, Profile::BdRom | Profile::BdRSrm)
    }
}

/// Order of the entries inside the profile-list feature
const PROFILE_LIST: [Profile; 6] = [
    Profile::CdRom,
    Profile::CdR,
    Profile::DvdRom,
    Profile::DvdPlusR,
    Profile::BdRom,
    Profile::BdRSrm,
];

/// One feature descriptor
#[derive(Debug, Clone)]
pub struct Feature {
    pub code: u16,
    pub version: u8,
    pub persistent: bool,
    pub current: bool,
    /// Code-specific payload following the 4-byte header
    pub data: Vec<u8>,
}

impl Feature {
    fn new(code: u16, version: u8, persistent: bool, data: Vec<u8>) -> Self {
        Self { code, version, persistent, current: persistent, data }
    }

    /// Serialized descriptor: header plus payload
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.extend_from_slice(&self.code.to_be_bytes());
        out.push((self.version << 2) | ((self.persistent as u8) << 1) | self.current as u8);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Write-speed descriptor for GET PERFORMANCE type 0x03
#[derive(Debug, Clone, Copy)]
pub struct WriteSpeedDescriptor {
    pub wrc: u8,
    pub end_lba: u32,
    pub read_speed: u32,
    pub write_speed: u32,
}

impl WriteSpeedDescriptor {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = (self.wrc & 0x03) << 3;
        buf[4..8].copy_from_slice(&self.end_lba.to_be_bytes());
        buf[8..12].copy_from_slice(&self.read_speed.to_be_bytes());
        buf[12..16].copy_from_slice(&self.write_speed.to_be_bytes());
        buf
    }
}

/// Per-profile write speeds in kB/s (values observed on a real drive)
const WRITE_SPEEDS_CD: [u32; 6] = [0x1B90, 0x160D, 0x108A, 0x0B07, 0x06E4, 0x02C2];
const WRITE_SPEEDS_DVD: [u32; 12] = [
    0x5690, 0x40EC, 0x361A, 0x2B48, 0x2076, 0x1B0D, 0x15A4, 0x11DA, 0x103B, 0x0CFC, 0x0AD2,
    0x0569,
];
const WRITE_SPEEDS_BD: [u32; 1] = [0x231E];

/// Disc length advertised while no medium is loaded
const EMPTY_END_SECTOR: u32 = 0x0023127F;

/// Feature list, current profile and write-speed descriptors
#[derive(Debug)]
pub struct FeatureStore {
    features: Vec<Feature>,
    current_profile: Profile,
    write_descriptors: Vec<WriteSpeedDescriptor>,
}

impl FeatureStore {
    pub fn new() -> Self {
        let mut store = Self {
            features: Vec::new(),
            current_profile: Profile::None,
            write_descriptors: Vec::new(),
        };
        store.install_features();
        store
    }

    pub fn current_profile(&self) -> Profile {
        self.current_profile
    }

    /// All features in ascending code order
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn write_descriptors(&self) -> &[WriteSpeedDescriptor] {
        &self.write_descriptors
    }

    fn add(&mut self, feature: Feature) {
        let pos = self.features.partition_point(|f| f.code < feature.code);
        self.features.insert(pos, feature);
    }

    fn get_mut(&mut self, code: u16) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| f.code == code)
    }

    fn install_features(&mut self) {
        // 0x0000: Profile List; persistent. One 4-byte entry per profile.
        self.add(Feature::new(0x0000, 0x00, true, {
            let mut data = Vec::with_capacity(PROFILE_LIST.len() * 4);
            for profile in PROFILE_LIST {
                data.extend_from_slice(&profile.code().to_be_bytes());
                data.push(0); // current bit, maintained by set_profile
                data.push(0);
            }
            data
        }));

        // 0x0001: Core; persistent, version 2, ATAPI interface
        self.add(Feature::new(0x0001, 0x02, true, {
            let mut data = vec![0u8; 8];
            data[0..4].copy_from_slice(&2u32.to_be_bytes());
            data
        }));

        // 0x0002: Morphing; persistent, version 1
        self.add(Feature::new(0x0002, 0x01, true, vec![0u8; 4]));

        // 0x0003: Removable Medium; persistent. Tray mechanism, eject and
        // lock supported.
        self.add(Feature::new(0x0003, 0x00, true, vec![0x29, 0, 0, 0]));

        // 0x0010: Random Readable. 2048-byte blocks, blocking 1, PP set.
        self.add(Feature::new(0x0010, 0x00, false, {
            let mut data = vec![0u8; 8];
            data[0..4].copy_from_slice(&2048u32.to_be_bytes());
            data[4..6].copy_from_slice(&1u16.to_be_bytes());
            data[6] = 0x01;
            data
        }));

        // 0x001D: Multi-Read
        self.add(Feature::new(0x001D, 0x00, false, Vec::new()));

        // 0x001E: CD Read; version 2, C2 flags and CD-Text
        self.add(Feature::new(0x001E, 0x02, false, vec![0x03, 0, 0, 0]));

        // 0x001F: DVD Read; version 1, DVD Multi 1.1 and dual-layer DVD-R
        self.add(Feature::new(0x001F, 0x01, false, vec![0x01, 0, 0x01, 0]));

        // 0x0021: Incremental Streaming Writable; version 1, all data block
        // types, BUF, one link size of 7
        self.add(Feature::new(0x0021, 0x01, false, vec![0x00, 0xFF, 0x01, 0x01, 0x07, 0, 0, 0]));

        // 0x002B: DVD+R; writing supported
        self.add(Feature::new(0x002B, 0x00, false, vec![0x01, 0, 0, 0]));

        // 0x002D: CD Track at Once; version 2, BUF, raw/packed R-W,
        // test write, CD-RW, R-W subcode, all data types
        self.add(Feature::new(0x002D, 0x02, false, vec![0x5F, 0x00, 0xFF, 0xFF]));

        // 0x0040: BD Read; all class/version support masks set
        self.add(Feature::new(0x0040, 0x00, false, {
            let mut data = vec![0u8; 28];
            for chunk in data[4..].chunks_exact_mut(2) {
                chunk.copy_from_slice(&0xFFFFu16.to_be_bytes());
            }
            data
        }));

        // 0x0041: BD Write; all class/version support masks set
        self.add(Feature::new(0x0041, 0x00, false, {
            let mut data = vec![0u8; 20];
            for chunk in data[4..].chunks_exact_mut(2) {
                chunk.copy_from_slice(&0xFFFFu16.to_be_bytes());
            }
            data
        }));

        // 0x0100: Power Management; persistent
        self.add(Feature::new(0x0100, 0x00, true, Vec::new()));

        // 0x0103: CD External Audio Play; scan, separate channel mute and
        // volume, 0x100 volume levels
        self.add(Feature::new(0x0103, 0x00, false, {
            let mut data = vec![0x07, 0, 0, 0];
            data[2..4].copy_from_slice(&0x0100u16.to_be_bytes());
            data
        }));

        // 0x0106: DVD CSS; version 1
        self.add(Feature::new(0x0106, 0x00, false, vec![0, 0, 0, 0x01]));

        // 0x0107: Real Time Streaming; version 3, everything supported
        self.add(Feature::new(0x0107, 0x03, false, vec![0x1F, 0, 0, 0]));

        // 0x010A: Disc Control Blocks; same descriptors a real drive
        // returns
        self.add(Feature::new(0x010A, 0x00, false, {
            let mut data = Vec::new();
            data.extend_from_slice(b"FDC\0");
            data.extend_from_slice(b"SDC\0");
            data.extend_from_slice(b"TOC\0");
            data
        }));
    }

    /// Features active in each profile, on top of the persistent ones
    fn active_set(profile: Profile) -> &'static [u16] {
        match profile {
            Profile::None => &[],
            Profile::CdRom => &[0x0010, 0x001D, 0x001E, 0x0103, 0x0107],
            Profile::CdR => &[0x0010, 0x001D, 0x001E, 0x0021, 0x002D, 0x0103, 0x0107],
            Profile::DvdRom => &[0x0010, 0x001F, 0x0106, 0x0107],
            Profile::DvdPlusR => &[0x0010, 0x001F, 0x002B, 0x0106, 0x0107, 0x010A],
            Profile::BdRom => &[0x0010, 0x0040, 0x0107],
            Profile::BdRSrm => &[0x0010, 0x0021, 0x0040, 0x0041, 0x0107],
        }
    }

    /// Profile entries to mark current: a profile implies its
    /// lower-complexity counterpart
    fn implied_profiles(profile: Profile) -> &'static [Profile] {
        match profile {
            Profile::None => &[],
            Profile::CdRom => &[Profile::CdRom],
            Profile::CdR => &[Profile::CdR, Profile::CdRom],
            Profile::DvdRom => &[Profile::DvdRom],
            Profile::DvdPlusR => &[Profile::DvdPlusR],
            Profile::BdRom => &[Profile::BdRom],
            Profile::BdRSrm => &[Profile::BdRSrm, Profile::BdRom],
        }
    }

    /// Switch the active profile. `end_sector` is the advertised disc end
    /// for the write-speed descriptors; the 0x2A page copies are refreshed
    /// through `mode_pages`.
    pub fn set_profile(
        &mut self,
        profile: Profile,
        end_sector: Option<u32>,
        mode_pages: &mut ModePageStore,
    ) {
        // Reset current bits: persistent features stay current
        for feature in &mut self.features {
            feature.current = feature.persistent;
        }

        for &code in Self::active_set(profile) {
            match self.get_mut(code) {
                Some(feature) => feature.current = true,
                None => {
                    warn!(target: "opticd::device", code, "active feature not found");
                }
            }
        }

        // Maintain the profile-list entries
        let marked = Self::implied_profiles(profile);
        if let Some(list) = self.get_mut(0x0000) {
            for (entry, profile_entry) in list.data.chunks_exact_mut(4).zip(PROFILE_LIST) {
                let current = marked.contains(&profile_entry);
                entry[2] = current as u8;
            }
        }

        self.current_profile = profile;
        self.set_write_speed_descriptors(profile, end_sector, mode_pages);
    }

    fn set_write_speed_descriptors(
        &mut self,
        profile: Profile,
        end_sector: Option<u32>,
        mode_pages: &mut ModePageStore,
    ) {
        let speeds: &[u32] = match profile {
            Profile::CdRom | Profile::CdR | Profile::None => &WRITE_SPEEDS_CD,
            Profile::DvdRom | Profile::DvdPlusR => &WRITE_SPEEDS_DVD,
            Profile::BdRom | Profile::BdRSrm => &WRITE_SPEEDS_BD,
        };
        let end_lba = end_sector.unwrap_or(EMPTY_END_SECTOR);

        self.write_descriptors = speeds
            .iter()
            .map(|&speed| WriteSpeedDescriptor {
                wrc: 0,
                end_lba,
                read_speed: speed,
                write_speed: speed,
            })
            .collect();

        if let Some(page) = mode_pages.get_current_mut(0x2A) {
            let page_speeds: Vec<(u8, u16)> =
                speeds.iter().take(6).map(|&s| (0u8, s as u16)).collect();
            capabilities::set_write_speed_descriptors(page, &page_speeds);
        }
    }
}

impl Default for FeatureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_sorted_by_code() {
        let store = FeatureStore::new();
        let codes: Vec<u16> = store.features().iter().map(|f| f.code).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        assert_eq!(codes, sorted);
        assert_eq!(codes.first(), Some(&0x0000));
        assert_eq!(codes.last(), Some(&0x010A));
    }

    #[test]
    fn test_persistent_features_always_current() {
        let mut store = FeatureStore::new();
        let mut pages = ModePageStore::new();

        for profile in [Profile::None, Profile::CdRom, Profile::BdRSrm, Profile::None] {
            store.set_profile(profile, None, &mut pages);
            for feature in store.features() {
                if feature.persistent {
                    assert!(feature.current, "feature {:#06x} under {profile:?}", feature.code);
                }
            }
        }
    }

    #[test]
    fn test_profile_switch_sets_active_features() {
        let mut store = FeatureStore::new();
        let mut pages = ModePageStore::new();

        store.set_profile(Profile::CdR, None, &mut pages);
        let current: Vec<u16> =
            store.features().iter().filter(|f| f.current).map(|f| f.code).collect();
        assert!(current.contains(&0x002D));
        assert!(current.contains(&0x0021));
        assert!(!current.contains(&0x001F));

        store.set_profile(Profile::DvdRom, None, &mut pages);
        let current: Vec<u16> =
            store.features().iter().filter(|f| f.current).map(|f| f.code).collect();
        assert!(current.contains(&0x001F));
        assert!(current.contains(&0x0106));
        assert!(!current.contains(&0x002D));
    }

    #[test]
    fn test_profile_list_implication() {
        let mut store = FeatureStore::new();
        let mut pages = ModePageStore::new();
        store.set_profile(Profile::CdR, None, &mut pages);

        let list = store.features().iter().find(|f| f.code == 0x0000).unwrap();
        let entries: Vec<(u16, bool)> = list
            .data
            .chunks_exact(4)
            .map(|e| (u16::from_be_bytes([e[0], e[1]]), e[2] & 0x01 != 0))
            .collect();

        // CD-R implies CD-ROM; everything else clear
        assert_eq!(entries[0], (0x0008, true));
        assert_eq!(entries[1], (0x0009, true));
        assert!(entries[2..].iter().all(|&(_, cur)| !cur));
    }

    #[test]
    fn test_write_descriptors_follow_profile() {
        let mut store = FeatureStore::new();
        let mut pages = ModePageStore::new();

        store.set_profile(Profile::CdR, Some(333000), &mut pages);
        assert_eq!(store.write_descriptors().len(), 6);
        assert_eq!(store.write_descriptors()[0].write_speed, 0x1B90);
        assert_eq!(store.write_descriptors()[0].end_lba, 333000);

        store.set_profile(Profile::DvdPlusR, Some(2295104), &mut pages);
        assert_eq!(store.write_descriptors().len(), 12);
        assert_eq!(store.write_descriptors()[0].write_speed, 0x5690);

        store.set_profile(Profile::BdRom, None, &mut pages);
        assert_eq!(store.write_descriptors().len(), 1);
        assert_eq!(store.write_descriptors()[0].end_lba, EMPTY_END_SECTOR);
    }

    #[test]
    fn test_feature_serialization() {
        let store = FeatureStore::new();
        let core = store.features().iter().find(|f| f.code == 0x0001).unwrap();
        let bytes = core.serialize();
        assert_eq!(&bytes[0..2], &[0x00, 0x01]);
        assert_eq!(bytes[2], (0x02 << 2) | 0x02 | 0x01); // version 2, persistent, current
        assert_eq!(bytes[3], 8);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 2]); // ATAPI
    }
}
