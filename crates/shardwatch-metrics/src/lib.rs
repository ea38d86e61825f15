//! shardwatch-metrics — Prometheus view of the published snapshot.
//!
//! The text is rendered once per cycle, right before the snapshot is
//! published, and served verbatim by `/metrics` and `/api/prometheus`.

pub mod prometheus;

pub use prometheus::{CONTENT_TYPE, render_prometheus};
