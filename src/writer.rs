//! Append only writer for raw telemetry log files.

use core::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::instrument;

use crate::record::{FileHeader, Record};

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("could not create the parent directories of the log file: {0}")]
    CreateDirs(std::io::Error),
    #[error("could not create or truncate the log file: {0}")]
    Open(std::io::Error),
    #[error("could not write the file header: {0}")]
    WriteHeader(std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error(
        "record is mis-shaped: got {timestamps} timestamps (need exactly \
        {expected_timestamps}) and {waveform} waveform samples (need exactly \
        {expected_waveform})"
    )]
    InvalidShape {
        timestamps: usize,
        expected_timestamps: usize,
        waveform: usize,
        expected_waveform: usize,
    },
    #[error("could not append the record to the log file: {0}")]
    Write(std::io::Error),
    #[error("could not flush the record to disk: {0}")]
    Sync(std::io::Error),
}

/// Owns one log file for its lifetime and appends fixed size records.
///
/// Every append is flushed to durable storage before it returns, so a
/// record is either fully on disk or was never written. Throughput is
/// therefore bound by flush latency, which is fine at the sub second
/// record cadence this format is built for.
///
/// Exactly one writer may own a file; the caller enforces exclusivity.
/// Concurrent readers on the same file are fine, see
/// [`WindowReader`](crate::WindowReader).
#[derive(Debug)]
pub struct LogWriter {
    file: File,
    header: FileHeader,
    sequence: u32,
}

impl LogWriter {
    /// Creates (or truncates) the log file at `path` and writes the file
    /// header. Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// See the [`CreateError`] docs, everything in there is an io issue.
    #[instrument]
    pub fn create(
        path: impl AsRef<Path> + fmt::Debug,
        header: FileHeader,
    ) -> Result<Self, CreateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(CreateError::CreateDirs)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(CreateError::Open)?;
        file.write_all(&header.encode())
            .map_err(CreateError::WriteHeader)?;
        file.sync_data().map_err(CreateError::WriteHeader)?;

        Ok(Self {
            file,
            header,
            sequence: 0,
        })
    }

    /// Appends one record and blocks until it is on disk.
    ///
    /// The input must be pre-shaped: exactly `samples_per_record`
    /// timestamps and `channel_count * samples_per_record` waveform
    /// samples in channel major order. Mis-shaped input is rejected
    /// without writing a single byte, it is never truncated or padded.
    ///
    /// # Errors
    ///
    /// [`AppendError::InvalidShape`] on mis-shaped input, otherwise io
    /// issues while writing or syncing.
    #[instrument(skip(self, timestamps, waveform), level = "trace")]
    pub fn append(
        &mut self,
        unix_time_ns: u64,
        timestamps: &[u32],
        waveform: &[u16],
    ) -> Result<(), AppendError> {
        let expected_timestamps = self.header.samples_per_record as usize;
        let expected_waveform = self.header.samples_per_payload();
        if timestamps.len() != expected_timestamps || waveform.len() != expected_waveform {
            return Err(AppendError::InvalidShape {
                timestamps: timestamps.len(),
                expected_timestamps,
                waveform: waveform.len(),
                expected_waveform,
            });
        }

        let record = Record {
            unix_time_ns,
            sequence_index: self.sequence,
            payload_bytes: self.header.payload_bytes(),
            timestamps: timestamps.to_vec(),
            waveform: waveform.to_vec(),
        };
        // encode fully in memory first, a failed write never leaves a
        // partial record behind a successful return
        let mut buf = Vec::with_capacity(self.header.record_size());
        record.encode_into(&mut buf);

        self.file.write_all(&buf).map_err(AppendError::Write)?;
        self.file.sync_data().map_err(AppendError::Sync)?;
        self.sequence += 1;
        Ok(())
    }

    /// Sequence index the next appended record will carry.
    #[must_use]
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    #[must_use]
    pub fn layout(&self) -> &FileHeader {
        &self.header
    }

    /// Flushes and releases the file.
    ///
    /// Dropping the writer also releases the file, but only an explicit
    /// close reports flush failures.
    ///
    /// # Errors
    /// When the os fails to flush the file to disk the underlying io
    /// error is returned.
    #[instrument(skip(self))]
    pub fn close(self) -> std::io::Result<()> {
        self.file.sync_all()
    }
}
