//! `tagpose-runtime` – the per-frame detection-to-pose loop.
//!
//! # Modules
//!
//! - [`node`] – [`TagDetectorNode`][node::TagDetectorNode]: the image
//!   callback that runs decode, detect, assemble, annotate, broadcast and
//!   publish for each frame.
//! - [`assembler`] – [`FrameAssembler`][assembler::FrameAssembler]: joins
//!   raw detections with the marker registry and builds the parallel output
//!   records.
//! - [`throttle`] – [`DiagnosticThrottle`][throttle::DiagnosticThrottle]:
//!   keyed `governor` limiter that spaces out repeated per-tag warnings.
//! - [`image_io`] – decoding of raw image messages into `image` buffers and
//!   back.
//! - [`annotate`] – debug overlay of detected marker outlines.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod annotate;
pub mod assembler;
pub mod image_io;
pub mod node;
pub mod telemetry;
pub mod throttle;

pub use assembler::{Assembly, FrameAssembler};
pub use node::{FrameReport, NodeSettings, TagDetector, TagDetectorNode};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use throttle::{DEFAULT_WARN_PERIOD, DiagnosticThrottle};
