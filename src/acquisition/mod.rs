//! Sample acquisition building blocks
//!
//! Everything a probe composes to turn raw sensor callbacks into batches:
//! sources, sampling rates, the threshold filter, clock reconciliation and
//! the flush buffer.

pub mod buffer;
pub mod clock;
pub mod rate;
pub mod source;
pub mod threshold;

pub use buffer::FlushController;
pub use clock::{reconcile, Clock, FixedClock, SystemClock};
pub use rate::SamplingRate;
pub use source::{ChannelSource, SampleListener, SampleSource, SourceError};
pub use threshold::ThresholdFilter;
