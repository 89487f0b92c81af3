//! Binary telemetry log store with time windowed random access queries,
//! plus a decoder for the hardware's bit packed detection event stream.
//!
//! The log format is flat and fixed size on purpose: every record in a
//! file has the same byte length, so a time window maps straight onto
//! file offsets without scanning or a side index. See [`record`] for
//! the exact layout, [`writer`] and [`reader`] for the two sides of the
//! file, [`event`] for the detection stream and [`index`] for the
//! display facing aggregation.

pub mod event;
pub mod index;
pub mod reader;
pub mod record;
pub mod writer;

pub use event::{EventDecoder, SeizureRange};
pub use index::RangeIndex;
pub use reader::{Window, WindowReader};
pub use record::{FileHeader, Record};
pub use writer::LogWriter;

/// Milliseconds since the unix epoch.
pub type Timestamp = u64;
