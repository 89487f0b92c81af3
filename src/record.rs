//! The fixed binary layout shared by [`LogWriter`](crate::LogWriter) and
//! [`WindowReader`](crate::WindowReader).
//!
//! The format is intentionally flat: a 28 byte file header followed by
//! nothing but fixed size records. Every record in a file has the same
//! byte length, so record `i` starts at `HEADER_SIZE + i * record_size`
//! and a reader never has to scan.
//!
//! All multi byte integers are little endian regardless of the host.
//! This module does no I/O, it only transforms bytes.

/// First 8 bytes of every log file: a 7 character token plus a nul pad.
pub const MAGIC: [u8; 8] = *b"HALOLOG\0";
/// Newest format version this crate understands; also the one it writes.
pub const VERSION: u16 = 1;
/// Encoded size of [`FileHeader`].
pub const HEADER_SIZE: usize = 28;
/// Encoded size of the fixed record fields preceding the payload.
pub const RECORD_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("file does not start with the HALOLOG magic token")]
    BadMagic,
    #[error("format version {found} is newer than the latest this crate knows ({VERSION})")]
    UnsupportedVersion { found: u16 },
    #[error("input too short: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}

/// Layout parameters, written once at the start of every log file.
///
/// Immutable after that. Readers must validate the magic token and the
/// version before trusting any other field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    /// Unused so far, must round-trip as written.
    pub reserved: u16,
    pub channel_count: u32,
    pub samples_per_record: u32,
    /// Bit width of one waveform sample.
    pub sample_bits: u32,
    /// Bit width of one per-sample timestamp.
    pub timestamp_bits: u32,
}

impl Default for FileHeader {
    /// The deployed configuration: 32 channels, 128 samples per record,
    /// 16 bit samples, 32 bit ticks. Record size comes out at 8720 bytes.
    fn default() -> Self {
        Self {
            version: VERSION,
            reserved: 0,
            channel_count: 32,
            samples_per_record: 128,
            sample_bits: 16,
            timestamp_bits: 32,
        }
    }
}

impl FileHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&MAGIC);
        out[8..10].copy_from_slice(&self.version.to_le_bytes());
        out[10..12].copy_from_slice(&self.reserved.to_le_bytes());
        out[12..16].copy_from_slice(&self.channel_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.samples_per_record.to_le_bytes());
        out[20..24].copy_from_slice(&self.sample_bits.to_le_bytes());
        out[24..28].copy_from_slice(&self.timestamp_bits.to_le_bytes());
        out
    }

    /// # Errors
    ///
    /// [`FormatError::Truncated`] if there are less then [`HEADER_SIZE`]
    /// bytes, [`FormatError::BadMagic`] if the token is wrong and
    /// [`FormatError::UnsupportedVersion`] if the file is newer then
    /// this crate.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                needed: HEADER_SIZE,
                got: bytes.len(),
            });
        }
        // only the 7 character token is checked, the pad byte is free
        if bytes[0..7] != MAGIC[0..7] {
            return Err(FormatError::BadMagic);
        }
        let version = u16::from_le_bytes(bytes[8..10].try_into().expect("slice is 2 long"));
        if version > VERSION {
            return Err(FormatError::UnsupportedVersion { found: version });
        }
        Ok(Self {
            version,
            reserved: u16::from_le_bytes(bytes[10..12].try_into().expect("slice is 2 long")),
            channel_count: u32::from_le_bytes(bytes[12..16].try_into().expect("slice is 4 long")),
            samples_per_record: u32::from_le_bytes(
                bytes[16..20].try_into().expect("slice is 4 long"),
            ),
            sample_bits: u32::from_le_bytes(bytes[20..24].try_into().expect("slice is 4 long")),
            timestamp_bits: u32::from_le_bytes(bytes[24..28].try_into().expect("slice is 4 long")),
        })
    }

    /// Byte count of the two payload sections of a record together.
    #[must_use]
    pub fn payload_bytes(&self) -> u32 {
        self.samples_per_record * 4 + self.channel_count * self.samples_per_record * 2
    }

    /// On disk size of one full record.
    #[must_use]
    pub fn record_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload_bytes() as usize
    }

    /// Expected length of the waveform section in samples.
    #[must_use]
    pub fn samples_per_payload(&self) -> usize {
        (self.channel_count * self.samples_per_record) as usize
    }
}

/// One fixed size unit of persisted telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Capture start of this record, nanoseconds since the unix epoch.
    pub unix_time_ns: u64,
    /// Increments by exactly one per append. A jump means a record
    /// was lost.
    pub sequence_index: u32,
    /// Constant per file and derivable from the header, stored for
    /// sanity checking.
    pub payload_bytes: u32,
    /// One millisecond tick per sample. These are the ground truth for
    /// time based filtering, not the record's position in the file.
    pub timestamps: Vec<u32>,
    /// Channel major: `waveform[channel * samples_per_record + sample]`.
    pub waveform: Vec<u16>,
}

impl Record {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.unix_time_ns.to_le_bytes());
        out.extend_from_slice(&self.sequence_index.to_le_bytes());
        out.extend_from_slice(&self.payload_bytes.to_le_bytes());
        for ts in &self.timestamps {
            out.extend_from_slice(&ts.to_le_bytes());
        }
        for sample in &self.waveform {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }

    /// # Errors
    ///
    /// [`FormatError::Truncated`] if `bytes` is shorter then one full
    /// record for this `layout`. Extra bytes past the record are ignored.
    pub fn decode(bytes: &[u8], layout: &FileHeader) -> Result<Self, FormatError> {
        let needed = layout.record_size();
        if bytes.len() < needed {
            return Err(FormatError::Truncated {
                needed,
                got: bytes.len(),
            });
        }

        let ts_end = RECORD_HEADER_SIZE + 4 * layout.samples_per_record as usize;
        let timestamps = bytes[RECORD_HEADER_SIZE..ts_end]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("chunks are 4 long")))
            .collect();
        let waveform = bytes[ts_end..needed]
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes(chunk.try_into().expect("chunks are 2 long")))
            .collect();

        Ok(Self {
            unix_time_ns: u64::from_le_bytes(bytes[0..8].try_into().expect("slice is 8 long")),
            sequence_index: u32::from_le_bytes(bytes[8..12].try_into().expect("slice is 4 long")),
            payload_bytes: u32::from_le_bytes(bytes[12..16].try_into().expect("slice is 4 long")),
            timestamps,
            waveform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_layout() -> FileHeader {
        FileHeader {
            channel_count: 2,
            samples_per_record: 4,
            ..FileHeader::default()
        }
    }

    #[test]
    fn deployed_record_size_is_8720() {
        let header = FileHeader::default();
        assert_eq!(header.record_size(), 16 + 512 + 8192);
    }

    #[test]
    fn header_roundtrips_including_reserved() {
        let header = FileHeader {
            reserved: 0xbeef,
            ..FileHeader::default()
        };
        let decoded = FileHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = FileHeader::default().encode();
        bytes[0] = b'X';
        assert_eq!(FileHeader::decode(&bytes), Err(FormatError::BadMagic));
    }

    #[test]
    fn newer_version_is_rejected() {
        let header = FileHeader {
            version: VERSION + 1,
            ..FileHeader::default()
        };
        assert_eq!(
            FileHeader::decode(&header.encode()),
            Err(FormatError::UnsupportedVersion { found: VERSION + 1 })
        );
    }

    #[test]
    fn short_header_is_truncated_not_garbage() {
        let bytes = FileHeader::default().encode();
        assert_eq!(
            FileHeader::decode(&bytes[..10]),
            Err(FormatError::Truncated {
                needed: HEADER_SIZE,
                got: 10
            })
        );
    }

    #[test]
    fn record_roundtrips() {
        let layout = small_layout();
        let record = Record {
            unix_time_ns: 1_700_000_000_000_000_000,
            sequence_index: 7,
            payload_bytes: layout.payload_bytes(),
            timestamps: vec![0, 1, 2, 3],
            waveform: vec![10, 20, 30, 40, 50, 60, 70, 80],
        };

        let mut bytes = Vec::new();
        record.encode_into(&mut bytes);
        assert_eq!(bytes.len(), layout.record_size());

        let decoded = Record::decode(&bytes, &layout).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn partial_record_is_truncated() {
        let layout = small_layout();
        let record = Record {
            unix_time_ns: 0,
            sequence_index: 0,
            payload_bytes: layout.payload_bytes(),
            timestamps: vec![0; 4],
            waveform: vec![0; 8],
        };
        let mut bytes = Vec::new();
        record.encode_into(&mut bytes);
        bytes.truncate(bytes.len() - 1);

        assert!(matches!(
            Record::decode(&bytes, &layout),
            Err(FormatError::Truncated { .. })
        ));
    }
}
