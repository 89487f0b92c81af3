//! Aggregation of decoded detection ranges for the display layer, plus
//! discovery of the detection files in a logs directory tree.
//!
//! The acquisition side lays its output out as one directory per day:
//!
//! ```text
//! logs/2024-11-03/hour_14_detections.bin   bit packed event words
//! logs/2024-11-03/hour_14_raw.log          matching telemetry log
//! ```
//!
//! Ticks inside a detection file count from midnight UTC of the day the
//! directory is named after.

use core::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use itertools::Itertools;
use serde::Serialize;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{debug, instrument, warn};

use crate::event::{words, EventDecoder, SeizureRange};
use crate::Timestamp;

const MS_PER_DAY: u64 = 86_400_000;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("could not list the logs directory: {0}")]
    ListDir(std::io::Error),
    #[error("could not list a day directory: {0}")]
    ListDay(std::io::Error),
    #[error("could not read a detection file: {0}")]
    ReadFile(std::io::Error),
}

/// Day number since the unix epoch, the grouping key for the display
/// tables.
#[must_use]
pub fn day_of(ts: Timestamp) -> u64 {
    ts / MS_PER_DAY
}

/// Per day total for the daily counts table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCount {
    /// Days since the unix epoch, see [`day_of`].
    pub day: u64,
    pub count: usize,
}

/// Decoded ranges grouped the way the display tables want them: totals,
/// per day counts and the ranges of one selected day, all restricted to
/// a set of selected channels.
///
/// An empty channel selection selects nothing, not everything, matching
/// the display's behaviour before any channel is picked.
#[derive(Debug, Default)]
pub struct RangeIndex {
    ranges: Vec<SeizureRange>,
}

impl RangeIndex {
    pub fn insert(&mut self, range: SeizureRange) {
        self.ranges.push(range);
    }

    pub fn extend(&mut self, ranges: impl IntoIterator<Item = SeizureRange>) {
        self.ranges.extend(ranges);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeizureRange> {
        self.ranges.iter()
    }

    /// Total over the selected channels.
    #[must_use]
    pub fn total(&self, channels: &[u32]) -> usize {
        self.ranges
            .iter()
            .filter(|range| channels.contains(&range.channel))
            .count()
    }

    /// Per day totals over the selected channels, newest day first.
    #[must_use]
    pub fn daily_counts(&self, channels: &[u32]) -> Vec<DayCount> {
        self.ranges
            .iter()
            .filter(|range| channels.contains(&range.channel))
            .counts_by(|range| day_of(range.start))
            .into_iter()
            .sorted_by(|a, b| b.0.cmp(&a.0))
            .map(|(day, count)| DayCount { day, count })
            .collect()
    }

    /// Ranges of one day over the selected channels, latest end first
    /// (the detections table order).
    #[must_use]
    pub fn on_day(&self, day: u64, channels: &[u32]) -> Vec<&SeizureRange> {
        self.ranges
            .iter()
            .filter(|range| day_of(range.start) == day)
            .filter(|range| channels.contains(&range.channel))
            .sorted_by(|a, b| b.end.cmp(&a.end))
            .collect()
    }
}

/// Scans a logs directory tree and decodes every detection file in it.
///
/// Day directories are named `YYYY-MM-DD`; that date at midnight UTC is
/// the base time for every tick in the files below it. A directory whose
/// name is not a date falls back to each file's modification time, which
/// covers ad hoc capture directories. Non `.bin` files are skipped.
///
/// # Errors
///
/// Io issues while listing directories or reading files. Undecodable
/// words inside a file are not errors, the event stream is lossy.
#[instrument]
pub fn scan_logs_dir(dir: impl AsRef<Path> + fmt::Debug) -> Result<RangeIndex, ScanError> {
    let mut index = RangeIndex::default();
    for entry in fs::read_dir(dir.as_ref()).map_err(ScanError::ListDir)? {
        let day_dir = entry.map_err(ScanError::ListDir)?.path();
        if !day_dir.is_dir() {
            continue;
        }
        let day_base = dir_date_ms(&day_dir);
        if day_base.is_none() {
            debug!("directory {day_dir:?} is not named after a date, using file mtimes");
        }

        for entry in fs::read_dir(&day_dir).map_err(ScanError::ListDay)? {
            let file = entry.map_err(ScanError::ListDay)?.path();
            if !file.extension().is_some_and(|ext| ext == "bin") {
                continue;
            }
            let base = match day_base {
                Some(ms) => ms,
                None => mtime_ms(&file).map_err(ScanError::ReadFile)?,
            };

            let bytes = fs::read(&file).map_err(ScanError::ReadFile)?;
            let mut decoder = EventDecoder::new(base, &file);
            decoder.decode(words(&bytes), &mut index.ranges);
            if decoder.open_channels() > 0 {
                warn!(
                    "{} channel(s) still open at the end of {file:?}, \
                    dropping them",
                    decoder.open_channels()
                );
            }
        }
    }
    Ok(index)
}

/// Path of the raw telemetry log covering a detection, following the
/// acquisition side's layout: `logs/<YYYY-MM-DD>/hour_<HH>_raw.log`.
///
/// `None` if the range's start does not map to a representable date.
#[must_use]
pub fn raw_log_path(logs_dir: impl AsRef<Path>, range: &SeizureRange) -> Option<PathBuf> {
    let start_s = i64::try_from(range.start / 1000).ok()?;
    let start = OffsetDateTime::from_unix_timestamp(start_s).ok()?;
    let day = start
        .format(format_description!("[year]-[month]-[day]"))
        .ok()?;
    let file = format!("hour_{:02}_raw.log", start.hour());
    Some(logs_dir.as_ref().join(day).join(file))
}

/// Midnight UTC of the day the directory is named after, in ms since
/// the unix epoch.
fn dir_date_ms(dir: &Path) -> Option<Timestamp> {
    let name = dir.file_name()?.to_str()?;
    let date = Date::parse(name, format_description!("[year]-[month]-[day]")).ok()?;
    let midnight = date.midnight().assume_utc();
    u64::try_from(midnight.unix_timestamp())
        .ok()
        .map(|s| s * 1000)
}

fn mtime_ms(path: &Path) -> std::io::Result<Timestamp> {
    let modified = fs::metadata(path)?.modified()?;
    let since_epoch = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    Ok(since_epoch.as_millis() as u64)
}
