//! Transform Frame (TF) Engine.
//!
//! Maintains a graph of named reference frames and the stamped rigid-body
//! transforms that relate them.  Every registration is directed
//! (`parent → child`), but lookups may walk an edge backwards by inverting
//! it, so two markers seen by the same camera can be related to each other.
//!
//! Each edge keeps only its newest registration: a transform stamped earlier
//! than the one already stored is ignored.  Nothing ever expires here.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use tagpose_perception::transform::TfEngine;
//! use tagpose_types::{FrameHeader, Pose, StampedTransform, Vector3};
//!
//! let mut tf = TfEngine::new();
//! let mut pose = Pose::default();
//! pose.position = Vector3::new(0.0, 0.0, 1.5);
//! tf.set_transform(&StampedTransform {
//!     header: FrameHeader::new(Utc::now(), "camera"),
//!     child_frame_id: "tag_0".to_string(),
//!     transform: pose,
//! });
//!
//! let t = tf.lookup("camera", "tag_0").unwrap();
//! assert!((t.translation.vector.z - 1.5).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use nalgebra::{Isometry3, Quaternion as NaQuaternion, Translation3, UnitQuaternion};
use tagpose_types::{Pose, Quaternion, StampedTransform, Vector3};

// ────────────────────────────────────────────────────────────────────────────
// Message ⇄ nalgebra conversions
// ────────────────────────────────────────────────────────────────────────────

/// Convert a [`Pose`] message into an isometry.  The orientation is
/// renormalised on the way in.
pub fn pose_to_isometry(pose: &Pose) -> Isometry3<f64> {
    let q = pose.orientation;
    let rotation = UnitQuaternion::from_quaternion(NaQuaternion::new(q.w, q.x, q.y, q.z));
    let p = pose.position;
    Isometry3::from_parts(Translation3::new(p.x, p.y, p.z), rotation)
}

/// Convert an isometry back into a [`Pose`] message.
pub fn isometry_to_pose(iso: &Isometry3<f64>) -> Pose {
    let t = iso.translation.vector;
    let q = iso.rotation.quaternion();
    Pose {
        position: Vector3::new(t.x, t.y, t.z),
        orientation: Quaternion {
            x: q.i,
            y: q.j,
            z: q.k,
            w: q.w,
        },
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct TfEdge {
    stamp: DateTime<Utc>,
    transform: Isometry3<f64>,
}

/// Graph of named frames and the stamped transforms that relate them.
///
/// [`TfEngine::lookup`] performs BFS from source to target and returns the
/// composed transform `T_source_target`, which maps points expressed in the
/// target frame into the source frame.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `edges[parent][child]`
    edges: HashMap<String, HashMap<String, TfEdge>>,
    /// `parents[child]` – reverse adjacency for backwards traversal.
    parents: HashMap<String, HashSet<String>>,
}

impl TfEngine {
    /// Create an empty TF engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transform.header.frame_id → transform.child_frame_id`.
    ///
    /// Returns `false` (and leaves the graph untouched) when an edge with a
    /// newer stamp is already stored.
    pub fn set_transform(&mut self, transform: &StampedTransform) -> bool {
        let parent = &transform.header.frame_id;
        let child = &transform.child_frame_id;
        let stamp = transform.header.stamp;

        let children = self.edges.entry(parent.clone()).or_default();
        if let Some(existing) = children.get(child)
            && existing.stamp > stamp
        {
            return false;
        }
        children.insert(
            child.clone(),
            TfEdge {
                stamp,
                transform: pose_to_isometry(&transform.transform),
            },
        );
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        true
    }

    /// Stamp of the newest registration for `parent → child`, if any.
    pub fn latest_stamp(&self, parent: &str, child: &str) -> Option<DateTime<Utc>> {
        self.edges.get(parent)?.get(child).map(|e| e.stamp)
    }

    /// Number of registered edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashMap::len).sum()
    }

    /// Compute the composed transform from `source_frame` to `target_frame`.
    ///
    /// Returns `None` if the two frames are not connected.
    pub fn lookup(&self, source_frame: &str, target_frame: &str) -> Option<Isometry3<f64>> {
        if source_frame == target_frame {
            return Some(Isometry3::identity());
        }

        let mut queue: VecDeque<(String, Isometry3<f64>)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();

        queue.push_back((source_frame.to_string(), Isometry3::identity()));
        visited.insert(source_frame.to_string());

        while let Some((current, accumulated)) = queue.pop_front() {
            for (next, step) in self.neighbours(&current) {
                if visited.contains(&next) {
                    continue;
                }
                let composed = accumulated * step;
                if next == target_frame {
                    return Some(composed);
                }
                visited.insert(next.clone());
                queue.push_back((next, composed));
            }
        }

        None
    }

    // Forward edges as stored, backward edges inverted.
    fn neighbours(&self, frame: &str) -> Vec<(String, Isometry3<f64>)> {
        let mut out = Vec::new();
        if let Some(children) = self.edges.get(frame) {
            out.extend(children.iter().map(|(c, e)| (c.clone(), e.transform)));
        }
        if let Some(parents) = self.parents.get(frame) {
            for parent in parents {
                if let Some(edge) = self.edges.get(parent).and_then(|c| c.get(frame)) {
                    out.push((parent.clone(), edge.transform.inverse()));
                }
            }
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
