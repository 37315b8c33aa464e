//! Observability setup for ThreadKeep: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
