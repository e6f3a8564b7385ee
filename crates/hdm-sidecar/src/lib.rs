//! hdm-sidecar: watches a heap dump directory and ships finished dumps
//!
//! - `detector`: decides when a dump is complete; reaps abandoned files
//! - `orchestrator`: envelope → encrypt → upload → cleanup for one dump
//! - `upload`: presigned PUT uploads
//! - `metrics`: per-tenant counters and the Prometheus endpoint
//! - `daemon`: the polling loop tying them together

pub mod daemon;
pub mod detector;
pub mod metrics;
pub mod orchestrator;
pub mod upload;
