//! MacBinary / NDIF stream filter.
//!
//! A MacBinary file wraps a data fork and a resource fork behind a 128-byte
//! header protected by a CRC16-XModem. When the resource fork carries a
//! "bcem" record, the data fork is an NDIF image made of RAW / ZERO / ADC
//! chunks; otherwise the data fork is passed through unchanged.

use tracing::debug;

use std::path::Path;

use super::adc;
use super::rsrc_fork::RsrcFork;
use crate::image::stream::{FileStream, ImageStream};
use crate::image::ImageError;

const HEADER_SIZE: usize = 128;
const NDIF_SECTOR_SIZE: usize = 512;

// bcem chunk types
const BCEM_KENCODE: i8 = i8::MIN;
const BCEM_ADC: i8 = i8::MIN + 3;
const BCEM_TERM: i8 = -1;
const BCEM_ZERO: i8 = 0;
const BCEM_RAW: i8 = 2;

/// CRC16-XModem (polynomial 0x1021, zero seed) over the first 124 header
/// bytes
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Fields of the MacBinary header the filter needs
#[derive(Debug, Clone, Copy)]
struct MacBinaryHeader {
    datafork_len: u32,
    resfork_len: u32,
}

impl MacBinaryHeader {
    fn parse(buf: &[u8; HEADER_SIZE]) -> Option<Self> {
        // version, reserved bytes and the filename length bound the format
        let version = buf[0];
        let fn_length = buf[1];
        let reserved_1 = buf[74];
        let reserved_2 = buf[82];
        if version != 0 || reserved_1 != 0 || reserved_2 != 0 || !(1..=63).contains(&fn_length) {
            return None;
        }

        // A valid CRC indicates v2.0; the v1.0 heuristic is unreliable, so
        // mismatching files are refused outright
        let crc_stored = u16::from_be_bytes([buf[124], buf[125]]);
        if crc16_xmodem(&buf[..124]) != crc_stored {
            return None;
        }

        Some(Self {
            datafork_len: u32::from_be_bytes(buf[83..87].try_into().unwrap()),
            resfork_len: u32::from_be_bytes(buf[87..91].try_into().unwrap()),
        })
    }
}

/// One NDIF chunk
#[derive(Debug, Clone, Copy)]
struct NdifPart {
    chunk_type: i8,
    first_sector: u32,
    num_sectors: u32,
    in_offset: u32,
    in_length: u32,
}

/// Random-access MacBinary/NDIF reader
pub struct MacBinaryStream {
    stream: FileStream,
    datafork_len: u32,
    /// NDIF chunk index; empty for plain pass-through files
    parts: Vec<NdifPart>,
    inflate_buffer: Vec<u8>,
    io_buffer: Vec<u8>,
    cached_part: Option<usize>,
    length: u64,
}

impl MacBinaryStream {
    /// Probe `path` for a MacBinary header; returns `Ok(None)` when the
    /// file is not MacBinary
    pub fn open(path: &Path) -> Result<Option<Self>, ImageError> {
        let mut stream = FileStream::open(path)?;
        if stream.length() < HEADER_SIZE as u64 {
            return Ok(None);
        }

        let mut buf = [0u8; HEADER_SIZE];
        stream.read_exact_at(0, &mut buf)?;
        let Some(header) = MacBinaryHeader::parse(&buf) else {
            return Ok(None);
        };

        debug!(
            target: "opticd::device",
            datafork = header.datafork_len,
            resfork = header.resfork_len,
            "MacBinary header accepted"
        );

        // Read the resource fork, if any
        let fork = if header.resfork_len > 0 {
            let resfork_pos = (HEADER_SIZE * 2) as u64 + header.datafork_len as u64
                - (header.datafork_len % HEADER_SIZE as u32) as u64;
            let mut raw = vec![0u8; header.resfork_len as usize];
            stream.read_exact_at(resfork_pos, &mut raw)?;
            Some(RsrcFork::read_binary(&raw)?)
        } else {
            None
        };

        let bcem = fork.as_ref().and_then(|f| f.find_ref(b"bcem", 128));
        let Some(bcem) = bcem else {
            // Plain MacBinary wrapper: expose the data fork unchanged
            return Ok(Some(Self {
                stream,
                datafork_len: header.datafork_len,
                parts: Vec::new(),
                inflate_buffer: Vec::new(),
                io_buffer: Vec::new(),
                cached_part: None,
                length: header.datafork_len as u64,
            }));
        };

        let (parts, num_sectors, io_buffer_size, inflate_buffer_size) =
            build_ndif_index(&bcem.data)?;

        // Multi-file NDIF sets are announced through a "bcm#" record;
        // reading them is not supported
        if let Some(bcm) = fork.as_ref().and_then(|f| f.find_ref(b"bcm#", 128)) {
            if bcm.data.len() >= 4 {
                let part = u16::from_be_bytes([bcm.data[0], bcm.data[1]]);
                let total = u16::from_be_bytes([bcm.data[2], bcm.data[3]]);
                debug!(target: "opticd::device", part, total, "NDIF segment record");
                if total > 1 {
                    return Err(ImageError::UnsupportedFormat(
                        "segmented NDIF images are not supported".to_string(),
                    ));
                }
            }
        }

        debug!(
            target: "opticd::device",
            parts = parts.len(),
            io_buffer_size,
            inflate_buffer_size,
            "NDIF index generated"
        );

        Ok(Some(Self {
            stream,
            datafork_len: header.datafork_len,
            parts,
            inflate_buffer: vec![0u8; inflate_buffer_size],
            io_buffer: vec![0u8; io_buffer_size],
            cached_part: None,
            length: num_sectors as u64 * NDIF_SECTOR_SIZE as u64,
        }))
    }

    fn read_raw_chunk(&mut self, part_idx: usize, into_io: bool) -> Result<(), ImageError> {
        let part = self.parts[part_idx];
        let buffer = if into_io { &mut self.io_buffer } else { &mut self.inflate_buffer };

        let pos = HEADER_SIZE as u64 + part.in_offset as u64;
        let avail = (self.datafork_len - part.in_offset).min(part.in_length) as usize;
        let read = self.stream.read_at(pos, &mut buffer[..avail])?;
        if read != part.in_length as usize {
            return Err(ImageError::Malformed(format!(
                "short read of NDIF chunk {part_idx}: {read} of {} bytes",
                part.in_length
            )));
        }
        Ok(())
    }

    fn cache_part(&mut self, part_idx: usize) -> Result<(), ImageError> {
        if self.cached_part == Some(part_idx) {
            return Ok(());
        }

        let part = self.parts[part_idx];
        let out_size = part.num_sectors as usize * NDIF_SECTOR_SIZE;

        match part.chunk_type {
            BCEM_ZERO => self.inflate_buffer[..out_size].fill(0),
            BCEM_RAW => self.read_raw_chunk(part_idx, false)?,
            BCEM_ADC => {
                self.read_raw_chunk(part_idx, true)?;
                let (consumed, written) = adc::decompress(
                    &self.io_buffer[..part.in_length as usize],
                    &mut self.inflate_buffer[..out_size],
                );
                if consumed != part.in_length as usize || written != out_size {
                    return Err(ImageError::Malformed(format!(
                        "ADC chunk decoded {written} of {out_size} bytes"
                    )));
                }
            }
            other => {
                return Err(ImageError::Malformed(format!(
                    "unexpected NDIF chunk type {other} in index"
                )));
            }
        }

        self.cached_part = Some(part_idx);
        Ok(())
    }
}

impl ImageStream for MacBinaryStream {
    fn length(&self) -> u64 {
        self.length
    }

    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<usize, ImageError> {
        if position >= self.length {
            return Ok(0);
        }

        if self.parts.is_empty() {
            // Pass-through: data fork starts right after the header
            let avail = (self.length - position).min(buf.len() as u64) as usize;
            return self.stream.read_at(HEADER_SIZE as u64 + position, &mut buf[..avail]);
        }

        let sector = (position / NDIF_SECTOR_SIZE as u64) as u32;
        let Some(part_idx) = self
            .parts
            .iter()
            .position(|p| sector >= p.first_sector && sector < p.first_sector + p.num_sectors)
        else {
            return Ok(0);
        };

        self.cache_part(part_idx)?;

        let part = self.parts[part_idx];
        let part_size = part.num_sectors as usize * NDIF_SECTOR_SIZE;
        let offset = (position - part.first_sector as u64 * NDIF_SECTOR_SIZE as u64) as usize;
        let count = buf.len().min(part_size - offset);
        buf[..count].copy_from_slice(&self.inflate_buffer[offset..offset + count]);
        Ok(count)
    }
}

/// Parse a bcem record into the chunk index. Chunk extents are derived from
/// consecutive entries; the TERM entry closes the list at the image's total
/// sector count.
fn build_ndif_index(data: &[u8]) -> Result<(Vec<NdifPart>, u32, usize, usize), ImageError> {
    if data.len() < 128 {
        return Err(ImageError::Malformed("bcem block too short".to_string()));
    }

    let num_sectors = u32::from_be_bytes(data[76..80].try_into().unwrap());
    let num_blocks = u32::from_be_bytes(data[124..128].try_into().unwrap()) as usize;

    let entries = data
        .get(128..128 + num_blocks * 12)
        .ok_or_else(|| ImageError::Malformed("bcem data table truncated".to_string()))?;

    let sector_of = |entry: &[u8]| -> u32 {
        ((entry[0] as u32) << 16) | ((entry[1] as u32) << 8) | entry[2] as u32
    };

    let mut parts = Vec::new();
    let mut io_buffer_size = 0usize;
    let mut inflate_buffer_size = 0usize;

    for b in 0..num_blocks {
        let entry = &entries[b * 12..(b + 1) * 12];
        let chunk_type = entry[3] as i8;
        let start_sector = sector_of(entry);
        let end_sector = if b + 1 < num_blocks {
            sector_of(&entries[(b + 1) * 12..(b + 2) * 12])
        } else {
            num_sectors
        };

        match chunk_type {
            BCEM_ADC | BCEM_ZERO | BCEM_RAW => {
                let part = NdifPart {
                    chunk_type,
                    first_sector: start_sector,
                    num_sectors: end_sector - start_sector,
                    in_offset: u32::from_be_bytes(entry[4..8].try_into().unwrap()),
                    in_length: u32::from_be_bytes(entry[8..12].try_into().unwrap()),
                };

                if chunk_type != BCEM_ZERO {
                    inflate_buffer_size =
                        inflate_buffer_size.max(part.num_sectors as usize * NDIF_SECTOR_SIZE);
                }
                if chunk_type == BCEM_ADC {
                    io_buffer_size = io_buffer_size.max(part.in_length as usize);
                }
                parts.push(part);
            }
            BCEM_TERM => {
                // Terminating block marks the end of the image
            }
            BCEM_KENCODE => {
                return Err(ImageError::UnsupportedFormat(
                    "KenCode decompression is not supported".to_string(),
                ));
            }
            other => {
                return Err(ImageError::Malformed(format!("unknown bcem chunk type {other}")));
            }
        }
    }

    // ZERO chunks share the inflate buffer on copy-out
    let max_zero = parts
        .iter()
        .filter(|p| p.chunk_type == BCEM_ZERO)
        .map(|p| p.num_sectors as usize * NDIF_SECTOR_SIZE)
        .max()
        .unwrap_or(0);
    inflate_buffer_size = inflate_buffer_size.max(max_zero);

    Ok((parts, num_sectors, io_buffer_size, inflate_buffer_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_macbinary(datafork: &[u8], resfork: &[u8]) -> Vec<u8> {
        let mut header = [0u8; HEADER_SIZE];
        header[1] = 8; // filename length
        header[2..10].copy_from_slice(b"test.img");
        header[83..87].copy_from_slice(&(datafork.len() as u32).to_be_bytes());
        header[87..91].copy_from_slice(&(resfork.len() as u32).to_be_bytes());
        let crc = crc16_xmodem(&header[..124]);
        header[124..126].copy_from_slice(&crc.to_be_bytes());

        let mut out = header.to_vec();
        out.extend_from_slice(datafork);
        // Resource fork position per the header formula
        let resfork_pos =
            HEADER_SIZE * 2 + datafork.len() - datafork.len() % HEADER_SIZE;
        out.resize(resfork_pos, 0);
        out.extend_from_slice(resfork);
        out
    }

    #[test]
    fn test_non_macbinary_probe_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        std::fs::write(&path, vec![0xFFu8; 4096]).unwrap();
        assert!(MacBinaryStream::open(&path).unwrap().is_none());
    }

    #[test]
    fn test_bad_crc_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v1.bin");
        let mut image = build_macbinary(&[0u8; 256], &[]);
        image[124] ^= 0xFF; // break the CRC
        std::fs::write(&path, image).unwrap();
        assert!(MacBinaryStream::open(&path).unwrap().is_none());
    }

    #[test]
    fn test_passthrough_datafork() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrap.bin");
        let payload: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        std::fs::write(&path, build_macbinary(&payload, &[])).unwrap();

        let mut stream = MacBinaryStream::open(&path).unwrap().unwrap();
        assert_eq!(stream.length(), 1000);
        let mut buf = vec![0u8; 100];
        stream.read_exact_at(500, &mut buf).unwrap();
        assert_eq!(buf, payload[500..600]);
    }

    fn build_bcem(num_sectors: u32, entries: &[(u32, i8, u32, u32)]) -> Vec<u8> {
        let mut bcem = vec![0u8; 128];
        bcem[76..80].copy_from_slice(&num_sectors.to_be_bytes());
        bcem[124..128].copy_from_slice(&(entries.len() as u32).to_be_bytes());
        for &(sector, chunk_type, offset, length) in entries {
            let mut entry = [0u8; 12];
            entry[0] = (sector >> 16) as u8;
            entry[1] = (sector >> 8) as u8;
            entry[2] = sector as u8;
            entry[3] = chunk_type as u8;
            entry[4..8].copy_from_slice(&offset.to_be_bytes());
            entry[8..12].copy_from_slice(&length.to_be_bytes());
            bcem.extend_from_slice(&entry);
        }
        bcem
    }

    fn build_binary_fork_with_bcem(bcem: &[u8]) -> Vec<u8> {
        let data_offset = 16u32;
        let data_section_len = 4 + bcem.len() as u32;
        let map_offset = 16 + data_section_len;

        let mut out = Vec::new();
        out.extend_from_slice(&data_offset.to_be_bytes());
        out.extend_from_slice(&map_offset.to_be_bytes());
        out.extend_from_slice(&data_section_len.to_be_bytes());
        out.extend_from_slice(&58u32.to_be_bytes());
        out.extend_from_slice(&(bcem.len() as u32).to_be_bytes());
        out.extend_from_slice(bcem);
        out.extend_from_slice(&[0u8; 24]); // map header copy + handle + refs
        out.extend_from_slice(&28u16.to_be_bytes());
        out.extend_from_slice(&50u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(b"bcem");
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&10u16.to_be_bytes());
        out.extend_from_slice(&128u16.to_be_bytes());
        out.extend_from_slice(&(-1i16).to_be_bytes());
        out.push(0);
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&[0u8; 4]);
        out
    }

    #[test]
    fn test_ndif_raw_and_zero_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndif.bin");

        let raw = vec![0x33u8; NDIF_SECTOR_SIZE];
        let bcem = build_bcem(
            2,
            &[
                (0, BCEM_RAW, 0, NDIF_SECTOR_SIZE as u32),
                (1, BCEM_ZERO, 0, 0),
                (2, BCEM_TERM, 0, 0),
            ],
        );
        let fork = build_binary_fork_with_bcem(&bcem);
        std::fs::write(&path, build_macbinary(&raw, &fork)).unwrap();

        let mut stream = MacBinaryStream::open(&path).unwrap().unwrap();
        assert_eq!(stream.length(), 2 * NDIF_SECTOR_SIZE as u64);

        let mut buf = vec![0u8; NDIF_SECTOR_SIZE];
        stream.read_exact_at(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x33));
        stream.read_exact_at(NDIF_SECTOR_SIZE as u64, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_crc_helper() {
        // CRC16-XModem of "123456789" is the classic check value 0x31C3
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
    }
}
