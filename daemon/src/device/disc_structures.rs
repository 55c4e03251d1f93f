//! Fabrication of DVD and BD disc structures.
//!
//! READ DISC STRUCTURE is served from the image when it carries the
//! requested structure; otherwise the structures here are fabricated from
//! the current profile and disc length. Lengths in the 0xFF capability
//! lists mirror what a physical drive reports.

use super::features::Profile;

/// Sector count above which a DVD is reported as dual layer
const DVD_DUAL_LAYER_THRESHOLD: i32 = 2295104;

/// Fabricate the structure for `(layer, format)` under the current
/// profile; `None` when the combination is not supported
pub fn generate(
    profile: Profile,
    format: u8,
    disc_length: i32,
    report_css: bool,
) -> Option<Vec<u8>> {
    if profile.is_dvd() {
        generate_dvd(profile, format, disc_length, report_css)
    } else if profile.is_bd() {
        generate_bd(format)
    } else {
        None
    }
}

fn generate_dvd(
    profile: Profile,
    format: u8,
    disc_length: i32,
    report_css: bool,
) -> Option<Vec<u8>> {
    match format {
        0x00 => {
            // Physical Format Information
            let mut info = vec![0u8; 2048];
            let num_layers = if disc_length >= DVD_DUAL_LAYER_THRESHOLD { 2u8 } else { 1 };

            if profile == Profile::DvdRom {
                info[0] = 0x01; // book type DVD-ROM, part version 1
                info[1] = 0x02; // 120mm disc, 10.08 Mbps
                info[2] = (if num_layers == 2 { 0x20 } else { 0x00 }) | 0x01; // embossed layer
                info[3] = 0x00; // 0.267 um/bit, 0.74 um/track
                put_u24(&mut info[4..8], 0x30000); // data start
                put_u24(&mut info[8..12], 0x30000 + disc_length as u32); // data end
            } else {
                info[0] = 0xA2; // book type DVD+R, part version 2
                info[1] = 0x0F; // 120mm disc, max rate unspecified
                info[2] = 0x02; // recordable layer
                info[3] = 0x00;
                put_u24(&mut info[4..8], 0x30000);
                put_u24(&mut info[8..12], 0x260500); // max capacity
            }
            // Layer 0 end and BCA stay zero: parallel track path, no BCA
            Some(info)
        }
        0x01 => {
            // Copyright Information
            let mut info = vec![0u8; 4];
            if report_css {
                info[0] = 0x01; // CSS/CPPM
                info[1] = 0x00; // playable in all regions
            }
            Some(info)
        }
        0x04 => {
            // Manufacturing data: zero-filled
            Some(vec![0u8; 2048])
        }
        0xFF => {
            // Capability list; lengths as reported by a physical drive
            let entries: &[(u8, u8, u16)] = &[
                (0x00, 0x40, 4 + 2048),
                (0x01, 0x40, 4 + 4),
                (0x02, 0x40, 4 + 2048),
                (0x03, 0x40, 4 + 188),
                (0x04, 0xC0, 4 + 2048),
                (0x05, 0xC0, 4 + 4),
                (0x06, 0x40, 4 + 20),
                (0x07, 0x40, 4 + 24576),
                (0x08, 0x40, 4 + 2048),
                (0x09, 0x40, 4 + 4),
                (0x0A, 0x40, 4 + 12),
                (0x0B, 0x40, 4 + 4),
                (0x0C, 0x40, 4 + 30720),
                (0x0D, 0x40, 4 + 32772),
                (0x0E, 0x40, 4 + 64),
                (0x0F, 0xC0, 4 + 18),
                (0x10, 0x40, 4 + 2048),
                (0x11, 0x40, 4 + 256),
                (0x20, 0xC0, 4 + 8),
                (0x21, 0x40, 4 + 8),
                (0x22, 0x40, 4 + 8),
                (0x23, 0x40, 4 + 8),
                (0x24, 0x40, 4 + 8),
                (0x30, 0x40, 4 + 32768),
                (0x82, 0x40, 4 + 32),
                (0x86, 0x40, 4 + 24576),
                (0xC0, 0xC0, 4 + 4),
                (0xFF, 0x40, 4 + 112),
            ];
            Some(build_capability_list(entries))
        }
        _ => None,
    }
}

fn generate_bd(format: u8) -> Option<Vec<u8>> {
    match format {
        0x00 => {
            // Disc Information: DI and emergency-brake units are not
            // reproduced, return zeroed data
            Some(vec![0u8; 4096])
        }
        0xFF => {
            // Capability list; a physical drive reports zero lengths here
            let entries: &[(u8, u8, u16)] = &[
                (0x00, 0x40, 0),
                (0x03, 0x40, 0),
                (0x08, 0x40, 0),
                (0x09, 0x40, 0),
                (0x0A, 0x40, 0),
                (0x0F, 0x80, 0),
                (0x12, 0x40, 0),
                (0x30, 0x40, 0),
                (0x80, 0x40, 0),
                (0x81, 0x40, 0),
                (0x82, 0x40, 0),
                (0x84, 0x40, 0),
                (0xC0, 0x40, 0),
                (0xFF, 0x40, 0),
            ];
            Some(build_capability_list(entries))
        }
        _ => None,
    }
}

/// Entries are (format code, SDS/RDS bits in the byte's top half, length)
fn build_capability_list(entries: &[(u8, u8, u16)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 4);
    for &(format_code, flags, length) in entries {
        out.push(format_code);
        out.push(flags);
        out.extend_from_slice(&length.to_be_bytes());
    }
    out
}

fn put_u24(dest: &mut [u8], value: u32) {
    dest[0] = 0;
    dest[1] = (value >> 16) as u8;
    dest[2] = (value >> 8) as u8;
    dest[3] = value as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_dvd_bd_profiles_fabricate_nothing() {
        assert!(generate(Profile::CdRom, 0x00, 1000, false).is_none());
        assert!(generate(Profile::None, 0xFF, 0, false).is_none());
    }

    #[test]
    fn test_dvd_physical_format() {
        let info = generate(Profile::DvdRom, 0x00, 1_000_000, false).unwrap();
        assert_eq!(info.len(), 2048);
        assert_eq!(info[0], 0x01); // DVD-ROM book
        assert_eq!(&info[4..8], &[0x00, 0x03, 0x00, 0x00]); // data start 0x30000
        let end = u32::from_be_bytes([0, info[9], info[10], info[11]]);
        assert_eq!(end, 0x30000 + 1_000_000);

        // Dual layer above the threshold
        let info = generate(Profile::DvdRom, 0x00, 2_400_000, false).unwrap();
        assert_eq!(info[2] & 0x60, 0x20);
    }

    #[test]
    fn test_dvd_plus_r_physical_format() {
        let info = generate(Profile::DvdPlusR, 0x00, 100, false).unwrap();
        assert_eq!(info[0], 0xA2); // DVD+R book, part version 2
        let end = u32::from_be_bytes([0, info[9], info[10], info[11]]);
        assert_eq!(end, 0x260500);
    }

    #[test]
    fn test_copyright_follows_css_option() {
        let off = generate(Profile::DvdRom, 0x01, 0, false).unwrap();
        assert_eq!(off, vec![0, 0, 0, 0]);

        let on = generate(Profile::DvdRom, 0x01, 0, true).unwrap();
        assert_eq!(on[0], 0x01);
        assert_eq!(on[1], 0x00);
    }

    #[test]
    fn test_capability_lists() {
        let dvd = generate(Profile::DvdRom, 0xFF, 0, false).unwrap();
        assert_eq!(dvd.len(), 28 * 4);
        assert_eq!(dvd[0], 0x00);
        assert_eq!(dvd[dvd.len() - 4], 0xFF);

        let bd = generate(Profile::BdRom, 0xFF, 0, false).unwrap();
        assert_eq!(bd.len(), 14 * 4);
        assert!(bd.chunks_exact(4).all(|e| e[2] == 0 && e[3] == 0));
    }

    #[test]
    fn test_bd_disc_information_is_zeroed() {
        let info = generate(Profile::BdRSrm, 0x00, 0, false).unwrap();
        assert_eq!(info.len(), 4096);
        assert!(info.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unknown_formats_rejected() {
        assert!(generate(Profile::DvdRom, 0x55, 0, false).is_none());
        assert!(generate(Profile::BdRom, 0x04, 0, false).is_none());
    }
}
