//! Control-device wire protocol.
//!
//! These definitions must stay in sync with the kernel module's request and
//! response structures. All header fields are little-endian; the SCSI CDB
//! payload itself keeps its native big-endian field encoding.

/// Maximum CDB length carried in a request header
pub const MAX_CDB_LEN: usize = 16;

/// Maximum number of user sectors a single transfer may carry
pub const MAX_SECTORS: usize = 256;

/// Space reserved for sense data in the response
pub const MAX_SENSE: usize = 256;

/// Round a byte count up to 512-byte sectors
const fn to_sectors(len: usize) -> usize {
    (len + 511) / 512
}

/// Size of the kernel I/O buffer: the largest transfer (256 user sectors of
/// 512 bytes) plus sense and the response header, rounded up to sectors
pub const KERNEL_IO_BUFFER_SIZE: usize =
    512 * (MAX_SECTORS + to_sectors(MAX_SENSE + ResponseHeader::SIZE));

/// Request header read from the control device, followed by `data_len`
/// bytes of inbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Opaque tag, echoed in the response
    pub tag: u32,
    /// Logical unit number
    pub lun: u32,
    /// Command descriptor block, zero-padded past `cdb_len`
    pub cdb: [u8; MAX_CDB_LEN],
    /// Declared CDB length, 1..=16
    pub cdb_len: u8,
    /// Upper bound on both inbound and outbound payload
    pub data_len: u32,
}

impl RequestHeader {
    /// Serialized size of the request header
    pub const SIZE: usize = 4 + 4 + MAX_CDB_LEN + 1 + 4;

    /// Parse a request header from the start of `buf`. Returns `None` when
    /// the buffer is short or the declared CDB length is out of range.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        let tag = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let lun = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let mut cdb = [0u8; MAX_CDB_LEN];
        cdb.copy_from_slice(&buf[8..24]);
        let cdb_len = buf[24];
        let data_len = u32::from_le_bytes(buf[25..29].try_into().unwrap());

        if cdb_len == 0 || cdb_len as usize > MAX_CDB_LEN {
            return None;
        }

        // Zero the bytes past the declared CDB length so handlers can index
        // a full 12-byte command unconditionally
        for byte in cdb.iter_mut().skip(cdb_len as usize) {
            *byte = 0;
        }

        Some(Self { tag, lun, cdb, cdb_len, data_len })
    }

    /// Serialize the request header (used by tests and tools feeding the
    /// daemon without a kernel module)
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.tag.to_le_bytes());
        buf[4..8].copy_from_slice(&self.lun.to_le_bytes());
        buf[8..24].copy_from_slice(&self.cdb);
        buf[24] = self.cdb_len;
        buf[25..29].copy_from_slice(&self.data_len.to_le_bytes());
        buf
    }
}

/// Response header written back to the control device, followed by
/// `data_len` bytes of outbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Tag copied from the request
    pub tag: u32,
    /// SCSI status (0 = GOOD, 2 = CHECK CONDITION)
    pub status: u32,
    /// Actual outbound payload length
    pub data_len: u32,
}

impl ResponseHeader {
    /// Serialized size of the response header
    pub const SIZE: usize = 12;

    /// Serialize the response header
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.tag.to_le_bytes());
        buf[4..8].copy_from_slice(&self.status.to_le_bytes());
        buf[8..12].copy_from_slice(&self.data_len.to_le_bytes());
        buf
    }

    /// Parse a response header (tests and tools)
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            tag: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            status: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            data_len: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_roundtrip() {
        let mut cdb = [0u8; MAX_CDB_LEN];
        cdb[0] = 0x28;
        cdb[8] = 0x10;
        let header = RequestHeader {
            tag: 42,
            lun: 0,
            cdb,
            cdb_len: 10,
            data_len: 0x8000,
        };

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), RequestHeader::SIZE);
        let parsed = RequestHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_request_header_pads_cdb() {
        let mut cdb = [0xFFu8; MAX_CDB_LEN];
        cdb[0] = 0x00;
        let header = RequestHeader { tag: 1, lun: 0, cdb, cdb_len: 6, data_len: 0 };

        let parsed = RequestHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(&parsed.cdb[6..], &[0u8; 10]);
    }

    #[test]
    fn test_request_header_rejects_bad_cdb_len() {
        let header = RequestHeader {
            tag: 1,
            lun: 0,
            cdb: [0; MAX_CDB_LEN],
            cdb_len: 17,
            data_len: 0,
        };
        let mut bytes = header.to_bytes();
        bytes[24] = 17;
        assert!(RequestHeader::parse(&bytes).is_none());
        bytes[24] = 0;
        assert!(RequestHeader::parse(&bytes).is_none());
    }

    #[test]
    fn test_response_header_roundtrip() {
        let header = ResponseHeader { tag: 7, status: 2, data_len: 18 };
        let parsed = ResponseHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_buffer_size_fits_largest_transfer() {
        assert!(KERNEL_IO_BUFFER_SIZE >= MAX_SECTORS * 512 + MAX_SENSE + ResponseHeader::SIZE);
        assert_eq!(KERNEL_IO_BUFFER_SIZE % 512, 0);
    }
}
