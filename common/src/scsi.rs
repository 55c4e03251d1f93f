//! SCSI types and constants for MMC optical drive emulation.
//!
//! This module provides the SPC/MMC-3 command definitions the daemon
//! interprets, plus the fixed-format sense record every failing command
//! produces. Layouts follow INF-8090; multi-byte CDB fields are big-endian
//! and are read through the accessors at the bottom of this module.

// ============================================================================
// SCSI Command Opcodes (SPC-2 / MMC-3)
// ============================================================================

/// SCSI packet command opcodes handled by the device
pub mod opcode {
    /// Test if the logical unit is ready
    pub const TEST_UNIT_READY: u8 = 0x00;
    /// Request sense data from previous command
    pub const REQUEST_SENSE: u8 = 0x03;
    /// Return device identification
    pub const INQUIRY: u8 = 0x12;
    /// Set mode parameters (6-byte)
    pub const MODE_SELECT_6: u8 = 0x15;
    /// Return mode parameters (6-byte)
    pub const MODE_SENSE_6: u8 = 0x1A;
    /// Start/stop unit, load/eject medium
    pub const START_STOP_UNIT: u8 = 0x1B;
    /// Prevent/allow medium removal
    pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
    /// Return logical block address capacity
    pub const READ_CAPACITY: u8 = 0x25;
    /// Read data from medium (10-byte CDB)
    pub const READ_10: u8 = 0x28;
    /// Seek to logical block address
    pub const SEEK_10: u8 = 0x2B;
    /// Write data to medium (10-byte CDB)
    pub const WRITE_10: u8 = 0x2A;
    /// Flush write cache
    pub const SYNCHRONIZE_CACHE: u8 = 0x35;
    /// Read buffer capacity (writers)
    pub const READ_BUFFER_CAPACITY: u8 = 0x5C;
    /// Read table of contents / PMA / ATIP
    pub const READ_TOC_PMA_ATIP: u8 = 0x43;
    /// Read Q subchannel data
    pub const READ_SUBCHANNEL: u8 = 0x42;
    /// Get configuration (features and profiles)
    pub const GET_CONFIGURATION: u8 = 0x46;
    /// Get event/status notification
    pub const GET_EVENT_STATUS_NOTIFICATION: u8 = 0x4A;
    /// Read disc information
    pub const READ_DISC_INFORMATION: u8 = 0x51;
    /// Read track information
    pub const READ_TRACK_INFORMATION: u8 = 0x52;
    /// Reserve a track on recordable media
    pub const RESERVE_TRACK: u8 = 0x53;
    /// Send cue sheet for session-at-once recording
    pub const SEND_CUE_SHEET: u8 = 0x5D;
    /// Set mode parameters (10-byte)
    pub const MODE_SELECT_10: u8 = 0x55;
    /// Return mode parameters (10-byte)
    pub const MODE_SENSE_10: u8 = 0x5A;
    /// Close track or session
    pub const CLOSE_TRACK_SESSION: u8 = 0x5B;
    /// Play audio (10-byte)
    pub const PLAY_AUDIO_10: u8 = 0x45;
    /// Play audio from MSF range
    pub const PLAY_AUDIO_MSF: u8 = 0x47;
    /// Pause/resume audio playback
    pub const PAUSE_RESUME: u8 = 0x4B;
    /// Report key (CSS / RPC)
    pub const REPORT_KEY: u8 = 0xA4;
    /// Play audio (12-byte)
    pub const PLAY_AUDIO_12: u8 = 0xA5;
    /// Read data from medium (12-byte CDB)
    pub const READ_12: u8 = 0xA8;
    /// Write data to medium (12-byte CDB)
    pub const WRITE_12: u8 = 0xAA;
    /// Get performance descriptors
    pub const GET_PERFORMANCE: u8 = 0xAC;
    /// Read DVD/BD disc structure
    pub const READ_DISC_STRUCTURE: u8 = 0xAD;
    /// Set streaming parameters
    pub const SET_STREAMING: u8 = 0xB6;
    /// Set CD rotation speed
    pub const SET_CD_SPEED: u8 = 0xBB;
    /// Read CD (full sector access)
    pub const READ_CD: u8 = 0xBE;
    /// Read CD addressed by MSF
    pub const READ_CD_MSF: u8 = 0xB9;
}

// ============================================================================
// SCSI Status Codes
// ============================================================================

/// SCSI status codes returned in the response header
pub mod status {
    /// Command completed successfully
    pub const GOOD: u32 = 0x00;
    /// Check condition - sense data available
    pub const CHECK_CONDITION: u32 = 0x02;
}

// ============================================================================
// Sense Key Codes
// ============================================================================

/// Sense key codes for error reporting
pub mod sense_key {
    /// No error
    pub const NO_SENSE: u8 = 0x00;
    /// Device not ready
    pub const NOT_READY: u8 = 0x02;
    /// Unrecoverable medium error
    pub const MEDIUM_ERROR: u8 = 0x03;
    /// Illegal request (bad CDB or parameter list)
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    /// Unit attention (media changed, reset, etc.)
    pub const UNIT_ATTENTION: u8 = 0x06;
}

// ============================================================================
// Additional Sense Codes (combined ASC/ASCQ)
// ============================================================================

/// ASC/ASCQ pairs, combined into a single big-endian u16 the way they are
/// written into the sense record (high byte = ASC, low byte = ASCQ)
pub mod asc_ascq {
    /// No additional sense information
    pub const NO_ADDITIONAL_SENSE_INFORMATION: u16 = 0x0000;
    /// Unrecovered read error (failed LEC check)
    pub const UNRECOVERED_READ_ERROR: u16 = 0x1100;
    /// Invalid command operation code
    pub const INVALID_COMMAND_OPERATION_CODE: u16 = 0x2000;
    /// Invalid field in CDB
    pub const INVALID_FIELD_IN_CDB: u16 = 0x2400;
    /// Invalid field in parameter list
    pub const INVALID_FIELD_IN_PARAMETER_LIST: u16 = 0x2600;
    /// Not ready to ready change, medium may have changed
    pub const NOT_READY_TO_READY_CHANGE: u16 = 0x2800;
    /// Command sequence error (recording commands out of order)
    pub const COMMAND_SEQUENCE_ERROR: u16 = 0x2C00;
    /// Cannot read medium, incompatible format
    pub const CANNOT_READ_MEDIUM_INCOMPATIBLE_FORMAT: u16 = 0x3002;
    /// Saving parameters not supported
    pub const SAVING_PARAMETERS_NOT_SUPPORTED: u16 = 0x3900;
    /// Medium not present
    pub const MEDIUM_NOT_PRESENT: u16 = 0x3A00;
    /// Medium removal prevented by lock
    pub const MEDIUM_REMOVAL_PREVENTED: u16 = 0x5302;
    /// Illegal mode for this track
    pub const ILLEGAL_MODE_FOR_THIS_TRACK: u16 = 0x6400;
}

// ============================================================================
// Audio Status Codes
// ============================================================================

/// Audio playback status reported in READ SUBCHANNEL and REQUEST SENSE
pub mod audio_status {
    /// Audio status not supported
    pub const UNSUPPORTED: u8 = 0x00;
    /// Play operation in progress
    pub const PLAYING: u8 = 0x11;
    /// Play operation paused
    pub const PAUSED: u8 = 0x12;
    /// Play operation completed successfully
    pub const COMPLETED: u8 = 0x13;
    /// Play operation stopped due to error
    pub const ERROR: u8 = 0x14;
    /// No current audio status to return
    pub const NOSTATUS: u8 = 0x15;
}

// ============================================================================
// Fixed-format sense data
// ============================================================================

/// Fixed-format sense data (18 bytes, response code 0x70)
#[derive(Debug, Clone, Copy, Default)]
pub struct SenseData {
    /// Response code (0x70 = current error)
    pub response_code: u8,
    /// Sense key (low nibble), ILI flag in bit 5
    pub sense_key: u8,
    /// Incorrect length indicator
    pub ili: bool,
    /// Information bytes (command-specific)
    pub information: [u8; 4],
    /// Command-specific information (offending LBA for read errors)
    pub command_info: [u8; 4],
    /// Additional sense code
    pub asc: u8,
    /// Additional sense code qualifier
    pub ascq: u8,
}

impl SenseData {
    /// Size of a fixed-format sense record
    pub const SIZE: usize = 18;

    /// Create sense data for a given error condition
    pub fn new(sense_key: u8, asc_ascq: u16) -> Self {
        Self {
            response_code: 0x70,
            sense_key,
            asc: (asc_ascq >> 8) as u8,
            ascq: (asc_ascq & 0xFF) as u8,
            ..Default::default()
        }
    }

    /// Create sense data with ILI flag and command information field
    pub fn with_info(sense_key: u8, asc_ascq: u16, ili: bool, command_info: u32) -> Self {
        let mut sense = Self::new(sense_key, asc_ascq);
        sense.ili = ili;
        sense.command_info = command_info.to_be_bytes();
        sense
    }

    /// Create sense data indicating no error; the additional sense code
    /// qualifier carries the audio status as per MMC-3
    pub fn no_sense(audio_status: u8) -> Self {
        let mut sense = Self::new(sense_key::NO_SENSE, asc_ascq::NO_ADDITIONAL_SENSE_INFORMATION);
        sense.ascq = audio_status;
        sense
    }

    /// Serialize sense data into the 18-byte wire layout
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.response_code;
        buf[2] = (self.sense_key & 0x0F) | if self.ili { 0x20 } else { 0 };
        buf[3..7].copy_from_slice(&self.information);
        buf[7] = 0x0A; // additional sense length
        buf[8..12].copy_from_slice(&self.command_info);
        buf[12] = self.asc;
        buf[13] = self.ascq;
        buf
    }
}

// ============================================================================
// CDB field accessors
// ============================================================================

/// Read a big-endian u16 CDB field at `offset`
pub fn cdb_get_u16(cdb: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([cdb[offset], cdb[offset + 1]])
}

/// Read a big-endian 24-bit CDB field at `offset`
pub fn cdb_get_u24(cdb: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([0, cdb[offset], cdb[offset + 1], cdb[offset + 2]])
}

/// Read a big-endian u32 CDB field at `offset`
pub fn cdb_get_u32(cdb: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([cdb[offset], cdb[offset + 1], cdb[offset + 2], cdb[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sense_data_layout() {
        let sense = SenseData::new(sense_key::NOT_READY, asc_ascq::MEDIUM_NOT_PRESENT);
        let bytes = sense.to_bytes();
        assert_eq!(bytes.len(), SenseData::SIZE);
        assert_eq!(bytes[0], 0x70);
        assert_eq!(bytes[2], 0x02);
        assert_eq!(bytes[7], 0x0A);
        assert_eq!(bytes[12], 0x3A);
        assert_eq!(bytes[13], 0x00);
    }

    #[test]
    fn test_sense_data_ili_and_info() {
        let sense = SenseData::with_info(
            sense_key::ILLEGAL_REQUEST,
            asc_ascq::ILLEGAL_MODE_FOR_THIS_TRACK,
            true,
            0x12345678,
        );
        let bytes = sense.to_bytes();
        assert_eq!(bytes[2], 0x25); // ILI | ILLEGAL REQUEST
        assert_eq!(&bytes[8..12], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(bytes[12], 0x64);
    }

    #[test]
    fn test_no_sense_carries_audio_status() {
        let sense = SenseData::no_sense(audio_status::PLAYING);
        let bytes = sense.to_bytes();
        assert_eq!(bytes[2], 0x00);
        assert_eq!(bytes[12], 0x00);
        assert_eq!(bytes[13], 0x11);
    }

    #[test]
    fn test_cdb_accessors() {
        // READ(10) CDB: opcode, flags, LBA[4], group, length[2], control
        let cdb = [0x28, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00];
        assert_eq!(cdb_get_u32(&cdb, 2), 0x00010000);
        assert_eq!(cdb_get_u16(&cdb, 7), 0x0010);
        assert_eq!(cdb_get_u24(&cdb, 3), 0x010000);
    }
}
