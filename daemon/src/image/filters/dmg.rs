//! Apple DMG (UDIF) stream filter.
//!
//! A DMG carries a 512-byte "koly" trailer pointing at either an XML plist
//! or a binary resource fork, whose "blkx" records list the compressed
//! chunks of the image. The filter builds a flat chunk index once at open
//! and serves random-access reads through a single-slot chunk cache.
//! Multi-segment images chain `<name>NNN.dmg` + `<name>(N+1).dmgpart`
//! files, each carrying its own trailer.

use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::adc;
use super::rsrc_fork::RsrcFork;
use crate::image::stream::{FileStream, ImageStream};
use crate::image::ImageError;

/// DMG images address the payload in 512-byte sectors
pub const DMG_SECTOR_SIZE: usize = 512;

const KOLY_SIZE: usize = 512;
const BLKX_HEADER_SIZE: usize = 204;
const BLKX_RUN_SIZE: usize = 40;

/// Chunk types appearing in blkx runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkType {
    Zero,
    Raw,
    Ignore,
    Adc,
    Zlib,
    Bzlib,
    Term,
    Comment,
}

impl ChunkType {
    fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ChunkType::Zero),
            1 => Some(ChunkType::Raw),
            2 => Some(ChunkType::Ignore),
            -1 => Some(ChunkType::Term),
            i32::MIN => None, // KenCode, unsupported
            x if x == i32::MIN + 4 => Some(ChunkType::Adc),
            x if x == i32::MIN + 5 => Some(ChunkType::Zlib),
            x if x == i32::MIN + 6 => Some(ChunkType::Bzlib),
            x if x == i32::MAX - 1 => Some(ChunkType::Comment),
            _ => None,
        }
    }

    fn is_compressed(&self) -> bool {
        matches!(self, ChunkType::Adc | ChunkType::Zlib | ChunkType::Bzlib)
    }
}

/// koly trailer fields the filter needs
#[derive(Debug, Clone, Copy, Default)]
struct KolyBlock {
    running_data_fork_offset: u64,
    data_fork_offset: u64,
    data_fork_length: u64,
    rsrc_fork_offset: u64,
    rsrc_fork_length: u64,
    segment_number: u32,
    segment_count: u32,
    xml_offset: u64,
    xml_length: u64,
    sector_count: u64,
}

impl KolyBlock {
    fn parse(buf: &[u8; KOLY_SIZE]) -> Option<Self> {
        if &buf[0..4] != b"koly" {
            return None;
        }
        let u64_at = |pos: usize| u64::from_be_bytes(buf[pos..pos + 8].try_into().unwrap());
        let u32_at = |pos: usize| u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
        Some(Self {
            running_data_fork_offset: u64_at(16),
            data_fork_offset: u64_at(24),
            data_fork_length: u64_at(32),
            rsrc_fork_offset: u64_at(40),
            rsrc_fork_length: u64_at(48),
            segment_number: u32_at(56),
            segment_count: u32_at(60),
            // checksum (136 bytes) sits between the segment ids and the
            // XML pointers
            xml_offset: u64_at(216),
            xml_length: u64_at(224),
            sector_count: u64_at(492),
        })
    }
}

/// One chunk of the flat index
#[derive(Debug, Clone, Copy)]
struct Part {
    chunk_type: ChunkType,
    first_sector: u64,
    num_sectors: u64,
    segment: usize,
    in_offset: u64,
    in_length: u64,
}

/// Random-access DMG reader
pub struct DmgStream {
    streams: Vec<FileStream>,
    koly: Vec<KolyBlock>,
    parts: Vec<Part>,
    inflate_buffer: Vec<u8>,
    io_buffer: Vec<u8>,
    cached_part: Option<usize>,
    length: u64,
}

impl DmgStream {
    /// Probe `path` for a DMG trailer; returns `Ok(None)` when the file is
    /// not a DMG
    pub fn open(path: &Path) -> Result<Option<Self>, ImageError> {
        let mut stream = FileStream::open(path)?;
        let Some(koly) = read_koly(&mut stream)? else {
            return Ok(None);
        };

        // Only the first file of a segmented set can be opened directly
        if koly.segment_number != 1 {
            return Err(ImageError::UnsupportedFormat(
                "file is a continuation part of a segmented DMG".to_string(),
            ));
        }

        let mut streams = vec![stream];
        let mut koly_blocks = vec![koly];

        // Open remaining segments and record their own trailers
        for segment in 1..koly.segment_count.max(1) {
            let filename = segment_filename(path, segment as usize)?;
            debug!(target: "opticd::device", segment, path = %filename.display(), "opening DMG segment");
            let mut seg_stream = FileStream::open(&filename)?;
            let seg_koly = read_koly(&mut seg_stream)?.ok_or_else(|| {
                ImageError::Malformed(format!(
                    "segment {} lacks a koly trailer",
                    filename.display()
                ))
            })?;
            streams.push(seg_stream);
            koly_blocks.push(seg_koly);
        }

        // Read the descriptors: XML plist preferred, binary fork otherwise
        let fork = if koly.xml_offset != 0 && koly.xml_length != 0 {
            let mut xml = vec![0u8; koly.xml_length as usize];
            streams[0].read_exact_at(koly.xml_offset, &mut xml)?;
            RsrcFork::read_xml(&xml)?
        } else if koly.rsrc_fork_offset != 0 && koly.rsrc_fork_length != 0 {
            let mut raw = vec![0u8; koly.rsrc_fork_length as usize];
            streams[0].read_exact_at(koly.rsrc_fork_offset, &mut raw)?;
            RsrcFork::read_binary(&raw)?
        } else {
            return Err(ImageError::Malformed(
                "image lacks both an XML and a binary descriptor".to_string(),
            ));
        };

        let (parts, io_buffer_size, inflate_buffer_size) =
            build_index(&fork, &koly_blocks)?;

        debug!(
            target: "opticd::device",
            parts = parts.len(),
            io_buffer_size,
            inflate_buffer_size,
            "DMG index generated"
        );

        Ok(Some(Self {
            streams,
            koly: koly_blocks,
            parts,
            inflate_buffer: vec![0u8; inflate_buffer_size],
            io_buffer: vec![0u8; io_buffer_size],
            cached_part: None,
            length: koly.sector_count * DMG_SECTOR_SIZE as u64,
        }))
    }

    /// Read the raw (still compressed) bytes of a part, following the
    /// segment chain when the chunk spans two files
    fn read_raw_chunk(&mut self, part_idx: usize, into_io: bool) -> Result<(), ImageError> {
        let part = self.parts[part_idx];
        let koly = self.koly[part.segment];

        let buffer =
            if into_io { &mut self.io_buffer } else { &mut self.inflate_buffer };

        let mut to_read = part.in_length as usize;
        let mut have_read = 0usize;

        let part_offs = koly.data_fork_offset + part.in_offset - koly.running_data_fork_offset;
        let part_avail =
            (koly.running_data_fork_offset + koly.data_fork_length - part.in_offset) as usize;

        let read = self.streams[part.segment]
            .read_at(part_offs, &mut buffer[..to_read.min(part_avail)])?;
        have_read += read;
        to_read -= read;

        if to_read > 0 {
            // Chunk continues in the next segment file
            let next = part.segment + 1;
            if next >= self.streams.len() {
                return Err(ImageError::Malformed(
                    "chunk extends past the last segment".to_string(),
                ));
            }
            let next_offs = self.koly[next].data_fork_offset;
            let read =
                self.streams[next].read_at(next_offs, &mut buffer[have_read..have_read + to_read])?;
            have_read += read;
            to_read -= read;
        }

        if to_read != 0 {
            return Err(ImageError::Malformed(format!(
                "short read of chunk {part_idx}: {have_read} of {} bytes",
                part.in_length
            )));
        }
        Ok(())
    }

    /// Decompress the chunk into the inflate buffer and mark it cached
    fn cache_part(&mut self, part_idx: usize) -> Result<(), ImageError> {
        if self.cached_part == Some(part_idx) {
            return Ok(());
        }

        let part = self.parts[part_idx];
        let out_size = part.num_sectors as usize * DMG_SECTOR_SIZE;

        match part.chunk_type {
            ChunkType::Zero | ChunkType::Ignore => {
                self.inflate_buffer[..out_size].fill(0);
            }
            ChunkType::Raw => {
                self.read_raw_chunk(part_idx, false)?;
            }
            ChunkType::Zlib => {
                self.read_raw_chunk(part_idx, true)?;
                let input = &self.io_buffer[..part.in_length as usize];
                let mut decoder = flate2::read::ZlibDecoder::new(input);
                decoder
                    .read_exact(&mut self.inflate_buffer[..out_size])
                    .map_err(|e| ImageError::Malformed(format!("zlib chunk: {e}")))?;
            }
            ChunkType::Bzlib => {
                self.read_raw_chunk(part_idx, true)?;
                let input = &self.io_buffer[..part.in_length as usize];
                let mut decoder = bzip2::read::BzDecoder::new(input);
                decoder
                    .read_exact(&mut self.inflate_buffer[..out_size])
                    .map_err(|e| ImageError::Malformed(format!("bzip2 chunk: {e}")))?;
            }
            ChunkType::Adc => {
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
            ChunkType::Term | ChunkType::Comment => {
                return Err(ImageError::Malformed("indexable chunk expected".to_string()));
            }
        }

        self.cached_part = Some(part_idx);
        Ok(())
    }
}

impl ImageStream for DmgStream {
    fn length(&self) -> u64 {
        self.length
    }

    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<usize, ImageError> {
        if position >= self.length {
            return Ok(0);
        }

        let sector = position / DMG_SECTOR_SIZE as u64;
        let Some(part_idx) = self
            .parts
            .iter()
            .position(|p| sector >= p.first_sector && sector < p.first_sector + p.num_sectors)
        else {
            return Ok(0);
        };

        self.cache_part(part_idx)?;

        let part = self.parts[part_idx];
        let part_size = part.num_sectors as usize * DMG_SECTOR_SIZE;
        let offset = (position - part.first_sector * DMG_SECTOR_SIZE as u64) as usize;
        let count = buf.len().min(part_size - offset);
        buf[..count].copy_from_slice(&self.inflate_buffer[offset..offset + count]);
        Ok(count)
    }
}

/// Read the koly trailer: first from the file end, then from the start
fn read_koly(stream: &mut FileStream) -> Result<Option<KolyBlock>, ImageError> {
    let mut buf = [0u8; KOLY_SIZE];
    if stream.length() >= KOLY_SIZE as u64 {
        stream.read_exact_at(stream.length() - KOLY_SIZE as u64, &mut buf)?;
        if let Some(koly) = KolyBlock::parse(&buf) {
            return Ok(Some(koly));
        }
        stream.read_exact_at(0, &mut buf)?;
        if let Some(koly) = KolyBlock::parse(&buf) {
            return Ok(Some(koly));
        }
    }
    Ok(None)
}

/// Derive the filename of segment `index` (zero-based) from the primary
/// `<name>NNN.dmg` filename
fn segment_filename(primary: &Path, index: usize) -> Result<PathBuf, ImageError> {
    let name = primary.to_string_lossy();
    if name.len() < 7 {
        return Err(ImageError::Malformed(format!(
            "cannot derive segment name from '{name}'"
        )));
    }
    // Strip the trailing 'NNN.dmg' and substitute the next index
    let base = &name[..name.len() - 7];
    Ok(PathBuf::from(format!("{base}{:03}.dmgpart", index + 1)))
}

/// Walk the blkx resources and emit the flat part index plus buffer sizes
fn build_index(
    fork: &RsrcFork,
    koly: &[KolyBlock],
) -> Result<(Vec<Part>, usize, usize), ImageError> {
    let blkx = fork
        .find_type(b"blkx")
        .ok_or_else(|| ImageError::Malformed("no blkx resources".to_string()))?;

    let mut parts = Vec::new();
    let mut io_buffer_size = 0usize;
    let mut inflate_buffer_size = 0usize;

    for rsrc in &blkx.refs {
        let data = &rsrc.data;
        if data.len() < BLKX_HEADER_SIZE || &data[0..4] != b"mish" {
            return Err(ImageError::Malformed("blkx block lacks mish signature".to_string()));
        }

        let first_sector_number = u64::from_be_bytes(data[8..16].try_into().unwrap());
        let data_start = u64::from_be_bytes(data[24..32].try_into().unwrap());
        let run_count = u32::from_be_bytes(data[200..204].try_into().unwrap()) as usize;

        for n in 0..run_count {
            let pos = BLKX_HEADER_SIZE + n * BLKX_RUN_SIZE;
            let run = data.get(pos..pos + BLKX_RUN_SIZE).ok_or_else(|| {
                ImageError::Malformed("blkx run table truncated".to_string())
            })?;

            let raw_type = i32::from_be_bytes(run[0..4].try_into().unwrap());
            let sector_offset = u64::from_be_bytes(run[8..16].try_into().unwrap());
            let sector_count = u64::from_be_bytes(run[16..24].try_into().unwrap());
            let compressed_offset = u64::from_be_bytes(run[24..32].try_into().unwrap());
            let compressed_length = u64::from_be_bytes(run[32..40].try_into().unwrap());

            let Some(chunk_type) = ChunkType::from_raw(raw_type) else {
                return Err(ImageError::UnsupportedFormat(format!(
                    "unknown blkx chunk type {raw_type:#x}"
                )));
            };

            if chunk_type == ChunkType::Term || chunk_type == ChunkType::Comment {
                continue;
            }

            let in_offset = koly[0].data_fork_offset + data_start + compressed_offset;

            // Segment owning this chunk: the last one whose running data
            // fork offset does not exceed the chunk's input offset
            let mut segment = 0usize;
            for (s, seg_koly) in koly.iter().enumerate() {
                if in_offset >= seg_koly.running_data_fork_offset {
                    segment = s;
                } else {
                    break;
                }
            }

            let part = Part {
                chunk_type,
                first_sector: first_sector_number + sector_offset,
                num_sectors: sector_count,
                segment,
                in_offset,
                in_length: compressed_length,
            };

            inflate_buffer_size =
                inflate_buffer_size.max(part.num_sectors as usize * DMG_SECTOR_SIZE);
            if chunk_type.is_compressed() {
                io_buffer_size = io_buffer_size.max(part.in_length as usize);
            }
            parts.push(part);
        }
    }

    Ok((parts, io_buffer_size, inflate_buffer_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Assemble a minimal single-segment DMG: data fork, XML plist, koly
    /// trailer
    fn build_test_dmg(chunks: &[(i32, &[u8], u64)]) -> Vec<u8> {
        // chunks: (type, compressed payload, sector count)
        let mut data_fork = Vec::new();
        let mut runs = Vec::new();
        let mut sector = 0u64;
        for &(raw_type, payload, sectors) in chunks {
            let mut run = Vec::new();
            run.extend_from_slice(&raw_type.to_be_bytes());
            run.extend_from_slice(&0u32.to_be_bytes());
            run.extend_from_slice(&sector.to_be_bytes());
            run.extend_from_slice(&sectors.to_be_bytes());
            run.extend_from_slice(&(data_fork.len() as u64).to_be_bytes());
            run.extend_from_slice(&(payload.len() as u64).to_be_bytes());
            runs.push(run);
            data_fork.extend_from_slice(payload);
            sector += sectors;
        }

        let mut blkx = Vec::new();
        blkx.extend_from_slice(b"mish");
        blkx.extend_from_slice(&1u32.to_be_bytes()); // info version
        blkx.extend_from_slice(&0u64.to_be_bytes()); // first sector
        blkx.extend_from_slice(&sector.to_be_bytes()); // sector count
        blkx.extend_from_slice(&0u64.to_be_bytes()); // data start
        blkx.extend_from_slice(&0u32.to_be_bytes()); // buffers requested
        blkx.extend_from_slice(&(-1i32).to_be_bytes()); // descriptor
        blkx.extend_from_slice(&[0u8; 24]); // reserved
        blkx.extend_from_slice(&[0u8; 136]); // checksum
        blkx.extend_from_slice(&(runs.len() as u32).to_be_bytes());
        for run in &runs {
            blkx.extend_from_slice(run);
        }

        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &blkx);
        let xml = format!(
            "<plist version=\"1.0\"><dict><key>resource-fork</key><dict>\
             <key>blkx</key><array><dict>\
             <key>ID</key><string>0</string>\
             <key>Name</key><string>whole disk</string>\
             <key>Data</key><data>{b64}</data>\
             </dict></array></dict></dict></plist>"
        );

        let mut image = data_fork.clone();
        let xml_offset = image.len() as u64;
        image.extend_from_slice(xml.as_bytes());

        let mut koly = vec![0u8; KOLY_SIZE];
        koly[0..4].copy_from_slice(b"koly");
        koly[16..24].copy_from_slice(&0u64.to_be_bytes()); // running offset
        koly[24..32].copy_from_slice(&0u64.to_be_bytes()); // data fork offset
        koly[32..40].copy_from_slice(&(data_fork.len() as u64).to_be_bytes());
        koly[56..60].copy_from_slice(&1u32.to_be_bytes()); // segment number
        koly[60..64].copy_from_slice(&1u32.to_be_bytes()); // segment count
        koly[216..224].copy_from_slice(&xml_offset.to_be_bytes());
        koly[224..232].copy_from_slice(&(xml.len() as u64).to_be_bytes());
        koly[492..500].copy_from_slice(&sector.to_be_bytes());
        image.extend_from_slice(&koly);
        image
    }

    #[test]
    fn test_non_dmg_probe_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.iso");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        assert!(DmgStream::open(&path).unwrap().is_none());
    }

    #[test]
    fn test_raw_and_zero_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test000.dmg");

        let raw_payload = vec![0x5Au8; 2 * DMG_SECTOR_SIZE];
        let image = build_test_dmg(&[
            (1, &raw_payload, 2), // RAW
            (0, &[], 2),          // ZERO
        ]);
        std::fs::write(&path, image).unwrap();

        let mut dmg = DmgStream::open(&path).unwrap().unwrap();
        assert_eq!(dmg.length(), 4 * DMG_SECTOR_SIZE as u64);

        let mut buf = vec![0u8; DMG_SECTOR_SIZE];
        dmg.read_exact_at(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x5A));

        dmg.read_exact_at(2 * DMG_SECTOR_SIZE as u64, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zlib_chunk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zlib000.dmg");

        let plain: Vec<u8> = (0..2 * DMG_SECTOR_SIZE).map(|i| (i % 251) as u8).collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let image = build_test_dmg(&[(i32::MIN + 5, &compressed, 2)]);
        std::fs::write(&path, image).unwrap();

        let mut dmg = DmgStream::open(&path).unwrap().unwrap();
        let mut buf = vec![0u8; 2 * DMG_SECTOR_SIZE];
        dmg.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_reads_cross_chunk_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("span000.dmg");

        let a = vec![0x11u8; DMG_SECTOR_SIZE];
        let b = vec![0x22u8; DMG_SECTOR_SIZE];
        let image = build_test_dmg(&[(1, &a, 1), (1, &b, 1)]);
        std::fs::write(&path, image).unwrap();

        let mut dmg = DmgStream::open(&path).unwrap().unwrap();
        let mut buf = vec![0u8; DMG_SECTOR_SIZE + 16];
        dmg.read_exact_at(DMG_SECTOR_SIZE as u64 - 8, &mut buf[..24]).unwrap();
        assert_eq!(&buf[..8], &[0x11u8; 8][..]);
        assert_eq!(&buf[8..24], &[0x22u8; 16][..]);
    }
}
