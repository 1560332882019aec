pub mod handoff;
pub mod historical;
pub mod realtime;

pub use historical::{Historical, HistoricalConfig};
pub use realtime::{Realtime, RealtimeConfig};
