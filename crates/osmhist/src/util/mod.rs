//! Utility modules.

pub mod timestamps;

pub use timestamps::{format_timestamp, parse_timestamp, Period, TimestampSeries};
