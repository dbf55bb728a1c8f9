//! Persisted observability for simulation runs.
//!
//! Two sinks, both JSONL (one JSON object per line, ISO-8601 UTC timestamps
//! with millisecond precision):
//!
//! - [`EventJournal`]: category-gated detail logs — transaction lifecycle,
//!   IBC packet flow, network drops, per-node state snapshots, per-relayer
//!   state snapshots. Each category writes its own file; per-node and
//!   per-relayer streams are created on demand.
//! - [`MetricsSink`]: counter/gauge/histogram observations appended to
//!   `metrics.jsonl`.
//!
//! All streams are mutex-guarded and buffered; `flush_all` is called by the
//! controller during teardown so artifacts close without truncation.

mod clock;
mod journal;
mod metrics;
mod stream;

pub use clock::iso8601_millis;
pub use journal::{EventJournal, IbcEvent, LogCategory, TxEvent};
pub use metrics::MetricsSink;
pub use stream::LogStream;
