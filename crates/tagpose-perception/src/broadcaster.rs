//! Frame broadcasting: registering resolved marker poses as named frames.
//!
//! [`broadcast`] turns one [`ResolvedPose`] into a `camera → marker`
//! [`StampedTransform`] and hands it to a [`FrameBroadcaster`].  Two sinks
//! exist: [`SharedTfEngine`] here, and the event bus `tf` topic in
//! `tagpose-middleware`.  Registrations are never garbage-collected.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use nalgebra::Isometry3;
use tagpose_types::{ResolvedPose, StampedTransform, TagError};

use crate::transform::TfEngine;

/// Sink for stamped frame registrations.
pub trait FrameBroadcaster {
    /// Register `transform.header.frame_id → transform.child_frame_id`.
    fn send_transform(&self, transform: StampedTransform) -> Result<(), TagError>;
}

/// Register `pose` as the frame `pose.source_frame` relative to its
/// reference frame, stamped with the image time.
pub fn broadcast<B: FrameBroadcaster + ?Sized>(
    broadcaster: &B,
    pose: &ResolvedPose,
) -> Result<(), TagError> {
    broadcaster.send_transform(StampedTransform::from(pose))
}

/// Fan-out: both sinks are always attempted; the first error is returned.
impl<A: FrameBroadcaster, B: FrameBroadcaster> FrameBroadcaster for (A, B) {
    fn send_transform(&self, transform: StampedTransform) -> Result<(), TagError> {
        let first = self.0.send_transform(transform.clone());
        let second = self.1.send_transform(transform);
        first.and(second)
    }
}

/// Cloneable, thread-safe handle to a [`TfEngine`].
#[derive(Debug, Clone, Default)]
pub struct SharedTfEngine {
    inner: Arc<RwLock<TfEngine>>,
}

impl SharedTfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composed transform `T_source_target`, or `Ok(None)` when the frames
    /// are not connected.
    pub fn lookup(
        &self,
        source_frame: &str,
        target_frame: &str,
    ) -> Result<Option<Isometry3<f64>>, TagError> {
        let tf = self
            .inner
            .read()
            .map_err(|_| TagError::Channel("tf engine lock poisoned".to_string()))?;
        Ok(tf.lookup(source_frame, target_frame))
    }

    pub fn latest_stamp(
        &self,
        parent: &str,
        child: &str,
    ) -> Result<Option<DateTime<Utc>>, TagError> {
        let tf = self
            .inner
            .read()
            .map_err(|_| TagError::Channel("tf engine lock poisoned".to_string()))?;
        Ok(tf.latest_stamp(parent, child))
    }

    /// Number of distinct `parent → child` edges registered so far.
    pub fn edge_count(&self) -> Result<usize, TagError> {
        let tf = self
            .inner
            .read()
            .map_err(|_| TagError::Channel("tf engine lock poisoned".to_string()))?;
        Ok(tf.edge_count())
    }
}

impl FrameBroadcaster for SharedTfEngine {
    fn send_transform(&self, transform: StampedTransform) -> Result<(), TagError> {
        let mut tf = self
            .inner
            .write()
            .map_err(|_| TagError::Channel("tf engine lock poisoned".to_string()))?;
        if !tf.set_transform(&transform) {
            tracing::debug!(
                parent = %transform.header.frame_id,
                child = %transform.child_frame_id,
                "ignoring out-of-order transform"
            );
        }
        Ok(())
    }
}
