//! `tagpose-perception` – metric geometry for detected markers.
//!
//! Turns pixel-space marker detections into poses and keeps track of the
//! named frames they define.
//!
//! # Modules
//!
//! - [`registry`] – [`MarkerRegistry`][registry::MarkerRegistry]: static
//!   identifier → physical size / frame name mapping loaded from config.
//! - [`pose`] – [`resolve`][pose::resolve]: pose-from-homography for a
//!   square marker of known size seen by a pinhole camera.
//! - [`transform`] – [`TfEngine`][transform::TfEngine]: graph of stamped
//!   named frames with BFS lookup between any two of them.
//! - [`broadcaster`] – [`FrameBroadcaster`][broadcaster::FrameBroadcaster]:
//!   the seam through which resolved poses are registered as frames.

pub mod broadcaster;
pub mod pose;
pub mod registry;
pub mod transform;

pub use broadcaster::{FrameBroadcaster, SharedTfEngine, broadcast};
pub use pose::{HomographyResolver, PoseResolver, resolve};
pub use registry::{LoadPolicy, MarkerRegistry};
pub use transform::TfEngine;
