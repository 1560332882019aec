//! Pipeline runtime: the `Triple` type, stage traits, the two-thread
//! datasource handoff, the five stream-processing stages, and the
//! module-name registry and driver that compose a config into a running
//! pipeline.
pub mod driver;
pub mod error;
pub mod registry;
pub mod sinks;
pub mod sources;
pub mod stage;
pub mod stages;
pub mod triple;

pub use driver::Pipeline;
pub use error::StageError;
pub use stage::{Filter, Sink, Source, TripleIter};
pub use triple::Triple;
