//! Decoder for the bit packed detection event stream.
//!
//! The detection hardware emits one 32 bit word per interval edge:
//!
//! ```text
//! bits [1:0]  edge type, 0b10 opens an interval, 0b01 closes it
//! bits [6:2]  1 based channel id, 0 is noise
//! bits [31:7] millisecond tick counter, wraps at 2^25, counted from
//!             the base time of the file the word came from
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::Timestamp;

const TICK_MASK: u32 = (1 << 25) - 1;
const CHANNEL_MASK: u32 = 0x1f;

const TYPE_OPEN: u32 = 0b10;
const TYPE_CLOSE: u32 = 0b01;

/// A paired open/close detection interval on one channel.
///
/// Created by [`EventDecoder`] when a close edge matches an earlier open
/// edge, immutable from then on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeizureRange {
    /// 0 based channel index.
    pub channel: u32,
    /// Interval open, ms since the unix epoch.
    pub start: Timestamp,
    /// Interval close, ms since the unix epoch. At or after `start`
    /// unless the 25 bit tick counter wrapped between the two edges.
    pub end: Timestamp,
    /// Detection file this range was decoded from.
    pub source: PathBuf,
}

impl SeizureRange {
    /// Clamped to zero when `end` lies before `start` (tick wraparound).
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.end.saturating_sub(self.start))
    }
}

/// Splits little endian bytes into event words. A trailing partial word
/// is dropped.
pub fn words(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("chunks are 4 long")))
}

/// Single forward pass decoder pairing open and close edges per channel.
///
/// Tolerance policy, matching what the hardware side gets away with:
///
/// - a second open on an already open channel replaces the first (last
///   open wins; the hardware never confirmed whether opens can nest, so
///   this drops data rather then invent intervals),
/// - a close without a matching open is dropped,
/// - channels still open when the stream ends never produce a range,
/// - words with channel id 0 or above 32 are noise and ignored.
///
/// None of these are errors, the stream is lossy by design.
///
/// The per channel state lives inside the decoder, so a chunked word
/// stream can be fed through repeated [`push`](Self::push) or
/// [`decode`](Self::decode) calls on the same instance.
#[derive(Debug)]
pub struct EventDecoder {
    /// Base time of the word stream, ms since the unix epoch.
    base: Timestamp,
    source: PathBuf,
    open_since: HashMap<u32, Timestamp>,
}

impl EventDecoder {
    pub fn new(base: Timestamp, source: impl AsRef<Path>) -> Self {
        Self {
            base,
            source: source.as_ref().to_path_buf(),
            open_since: HashMap::new(),
        }
    }

    /// Feeds one event word, returning a range when `word` closes one.
    pub fn push(&mut self, word: u32) -> Option<SeizureRange> {
        let channel_id = (word >> 2) & CHANNEL_MASK;
        if channel_id == 0 || channel_id > 32 {
            return None;
        }
        let channel = channel_id - 1;
        let at = self.base + Timestamp::from((word >> 7) & TICK_MASK);

        match word & 0b11 {
            TYPE_OPEN => {
                self.open_since.insert(channel, at);
                None
            }
            TYPE_CLOSE => {
                let start = self.open_since.remove(&channel)?;
                Some(SeizureRange {
                    channel,
                    start,
                    end: at,
                    source: self.source.clone(),
                })
            }
            _ => None,
        }
    }

    /// Decodes a whole word stream in one forward pass, appending every
    /// completed range to `out`.
    pub fn decode(&mut self, stream: impl IntoIterator<Item = u32>, out: &mut Vec<SeizureRange>) {
        out.extend(stream.into_iter().filter_map(|word| self.push(word)));
    }

    /// Channels with an open edge and no close yet. If the stream ends
    /// here these never become ranges.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.open_since.len()
    }
}
