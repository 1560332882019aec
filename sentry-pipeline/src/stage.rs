//! Stage traits realizing the pull-based iterator pipeline model: a source
//! produces a stream of triples, each filter wraps that stream in another
//! that does its own transformation lazily on every `next()` call, and a
//! sink drains the final stream, driving the whole pipeline from a single
//! call stack with no buffering between stages beyond what a given filter
//! needs to hold (e.g. `AggSum`'s aggregation window).
use crate::error::StageError;
use crate::triple::Triple;

/// The stream type every stage consumes and/or produces.
pub type TripleIter = Box<dyn Iterator<Item = Result<Triple, StageError>> + Send>;

/// A pipeline's first stage: produces triples from some upstream origin
/// (a historical HTTP API, a Kafka topic, ...).
pub trait Source: Send {
    fn into_stream(self: Box<Self>) -> TripleIter;
}

/// A pipeline's middle stage: transforms a triple stream into another
/// triple stream. Implementations may filter, aggregate, annotate or
/// reorder; they may also hold state across calls (a window, a buffer).
pub trait Filter: Send {
    fn apply(self: Box<Self>, input: TripleIter) -> TripleIter;
}

/// A pipeline's last stage: drains the stream, producing a side effect
/// (publishing alerts, writing to storage, ...) for every item.
pub trait Sink: Send {
    fn run(self: Box<Self>, input: TripleIter) -> Result<(), StageError>;
}
