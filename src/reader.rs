//! Time windowed random access queries against a raw telemetry log.

use core::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::record::{FileHeader, FormatError, Record, HEADER_SIZE};

/// 16 bit unsigned ADC codes are centred on this value.
const ADC_MIDPOINT: i32 = 32768;
/// Front end calibration: one ADC code step in microvolts.
const MICROVOLTS_PER_CODE: f32 = 0.195;

const MS_PER_HOUR: u64 = 3_600_000;

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("could not open the log file for reading: {0}")]
    Io(#[from] std::io::Error),
    #[error("log file header is not valid: {0}")]
    Format(#[from] FormatError),
}

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("channel {channel} does not exist, the file has {channel_count} channels")]
    ChannelOutOfRange { channel: u32, channel_count: u32 },
    #[error("error while seeking or reading records: {0}")]
    Io(#[from] std::io::Error),
    #[error("no samples with a tick inside the requested window")]
    NoSamplesInWindow,
}

/// A display ready waveform snippet for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Calibrated samples in microvolts, in increasing tick order.
    pub samples: Vec<f32>,
    /// Resolved window start in ms since the start of the hour, for
    /// axis labeling.
    pub start_ms: u64,
}

/// Read only handle on a log file.
///
/// May run concurrently with an active [`LogWriter`](crate::LogWriter)
/// on the same file: records are append only and a partially written
/// final record is absorbed, not an error.
#[derive(Debug)]
pub struct WindowReader {
    file: File,
    header: FileHeader,
}

impl WindowReader {
    /// Opens a log file read only and validates its header.
    ///
    /// # Errors
    ///
    /// Io issues, or a [`FormatError`] when the header is truncated, the
    /// magic token is wrong or the version is newer then this crate.
    #[instrument]
    pub fn open(path: impl AsRef<Path> + fmt::Debug) -> Result<Self, OpenError> {
        let mut file = File::open(path.as_ref())?;
        let mut raw = Vec::with_capacity(HEADER_SIZE);
        file.by_ref()
            .take(HEADER_SIZE as u64)
            .read_to_end(&mut raw)?;
        let header = FileHeader::decode(&raw)?;
        Ok(Self { file, header })
    }

    /// Layout of the underlying file, for caller side validation.
    #[must_use]
    pub fn layout(&self) -> &FileHeader {
        &self.header
    }

    /// Loads a calibrated snippet of one channel around a time of day.
    ///
    /// `target_time_of_day_ms` is taken modulo one hour: log files are
    /// hour scoped and the caller picks the file covering the right
    /// hour. A window that would cross the hour boundary is clipped to
    /// this file, it does not continue into the next one.
    ///
    /// The window is centred on the target, clamped at the start of the
    /// hour. The reader seeks straight to the first record that can
    /// contain it (record `i` lives at `HEADER_SIZE + i * record_size`)
    /// and then filters on the per-sample ticks: record boundaries are
    /// only approximately time aligned, the ticks are the ground truth.
    ///
    /// # Errors
    ///
    /// [`WindowError::ChannelOutOfRange`] for a channel the file does
    /// not have, io issues while seeking or reading, and
    /// [`WindowError::NoSamplesInWindow`] when nothing matched. A
    /// truncated record at the end of the file ends decoding without
    /// error, the writer may still be appending it.
    #[instrument(skip(self))]
    pub fn load_window(
        &mut self,
        channel: u32,
        target_time_of_day_ms: u64,
        window_ms: u64,
    ) -> Result<Window, WindowError> {
        if channel >= self.header.channel_count {
            return Err(WindowError::ChannelOutOfRange {
                channel,
                channel_count: self.header.channel_count,
            });
        }

        let target_ms = target_time_of_day_ms % MS_PER_HOUR;
        let start_ms = target_ms.saturating_sub(window_ms / 2);
        let end_ms = start_ms + window_ms;

        // One millisecond tick per sample, so ms / samples_per_record
        // approximates the record index. The tick filter below makes
        // the precise cut.
        let samples_per_record = u64::from(self.header.samples_per_record);
        let first_record = start_ms / samples_per_record;
        let last_record = end_ms / samples_per_record + 1;

        let record_size = self.header.record_size();
        let offset = HEADER_SIZE as u64 + first_record * record_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut samples = Vec::with_capacity(
            (last_record - first_record) as usize * samples_per_record as usize,
        );
        let mut buf = vec![0u8; record_size];
        let mut prev_sequence = None;
        for _ in first_record..last_record {
            if !read_full_record(&mut self.file, &mut buf)? {
                break;
            }
            let record = Record::decode(&buf, &self.header)
                .expect("buffer is exactly one record long");

            if let Some(prev) = prev_sequence {
                if record.sequence_index != prev + 1 {
                    warn!(
                        "sequence jumped from {prev} to {}, at least one \
                        record was lost",
                        record.sequence_index
                    );
                }
            }
            prev_sequence = Some(record.sequence_index);

            let channel_start = (channel * self.header.samples_per_record) as usize;
            for (i, &tick) in record.timestamps.iter().enumerate() {
                let tick = u64::from(tick);
                if tick < start_ms || tick > end_ms {
                    continue;
                }
                let code = i32::from(record.waveform[channel_start + i]);
                samples.push((code - ADC_MIDPOINT) as f32 * MICROVOLTS_PER_CODE);
            }
        }

        if samples.is_empty() {
            return Err(WindowError::NoSamplesInWindow);
        }
        Ok(Window { samples, start_ms })
    }
}

/// Reads exactly one record worth of bytes. Returns `Ok(false)` on a
/// clean end of file or a partial final record.
fn read_full_record(file: &mut File, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    debug!(
                        "partial record at the end of the file ({filled} of {} \
                        bytes), stopping here",
                        buf.len()
                    );
                }
                return Ok(false);
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}
