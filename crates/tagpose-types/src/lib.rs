//! `tagpose-types` – shared data model for the tag pose pipeline.
//!
//! Everything that crosses a crate boundary or travels over the event bus
//! lives here: detections as reported by the external detector, the
//! geometry messages produced by the pose resolver, the per-frame output
//! bundle, and the global [`TagError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier decoded from a fiducial marker.
pub type TagId = i32;

// ────────────────────────────────────────────────────────────────────────────
// Headers & calibration
// ────────────────────────────────────────────────────────────────────────────

/// Timestamp plus the coordinate frame a message is expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub stamp: DateTime<Utc>,
    /// e.g. `"camera_optical"`
    pub frame_id: String,
}

impl FrameHeader {
    pub fn new(stamp: DateTime<Utc>, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub px: f64,
    pub py: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, px: f64, py: f64) -> Self {
        Self { fx, fy, px, py }
    }

    /// Read the intrinsics out of a row-major 3×3 calibration matrix.
    pub fn from_k(k: &[f64; 9]) -> Self {
        Self::new(k[0], k[4], k[2], k[5])
    }

    /// Returns `true` when every value is finite and both focal lengths are
    /// non-zero.
    pub fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.px.is_finite()
            && self.py.is_finite()
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }
}

/// Calibration delivered alongside every image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub header: FrameHeader,
    pub width: u32,
    pub height: u32,
    /// Row-major intrinsic matrix.
    pub k: [f64; 9],
}

impl CameraInfo {
    pub fn intrinsics(&self) -> CameraIntrinsics {
        CameraIntrinsics::from_k(&self.k)
    }
}

/// A raw image buffer as delivered by the acquisition layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMessage {
    pub header: FrameHeader,
    pub width: u32,
    pub height: u32,
    /// Pixel layout, e.g. `"bgr8"`, `"rgb8"`, `"mono8"`.
    pub encoding: String,
    /// Row length in bytes (may include padding).
    pub step: u32,
    pub data: Vec<u8>,
}

// ────────────────────────────────────────────────────────────────────────────
// Detector output
// ────────────────────────────────────────────────────────────────────────────

/// Decoder bookkeeping carried through untouched for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodingMetadata {
    /// Code word the observation was matched to.
    pub code: u64,
    /// Code word as read from the image.
    pub obs_code: u64,
    pub hamming_distance: u32,
}

/// One marker as reported by the external detector for a single frame.
///
/// `corners` follow the detector convention: corner 0..3 counter-clockwise in
/// marker coordinates, starting from the `(-1, -1)` canonical corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub id: TagId,
    pub corners: [[f64; 2]; 4],
    pub center: [f64; 2],
    pub observed_perimeter: f64,
    #[serde(default)]
    pub decoding: DecodingMetadata,
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry messages
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Rotation quaternion, `(x, y, z, w)` field order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Rigid transform: position of the child frame origin and its orientation,
/// both expressed in the parent frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Quaternion,
}

// ────────────────────────────────────────────────────────────────────────────
// Registry & pipeline records
// ────────────────────────────────────────────────────────────────────────────

/// Physical metadata for one configured marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDescription {
    pub id: TagId,
    /// Edge length of the black square, in metres.
    pub size: f64,
    /// Name of the coordinate frame broadcast for this marker.
    pub frame_name: String,
}

/// Pose of one marker relative to the sensor frame for one image.
///
/// `header.frame_id` is the reference (camera) frame and `source_frame` the
/// marker's frame name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPose {
    pub header: FrameHeader,
    pub source_frame: String,
    pub pose: Pose,
}

/// Structured detection record: `(id, size, pose)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDetection {
    pub id: TagId,
    pub size: f64,
    pub pose: ResolvedPose,
}

/// All poses of one frame under a single shared header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseArray {
    pub header: FrameHeader,
    pub poses: Vec<Pose>,
}

/// Pixel-space record of a raw detection, published for every detected tag
/// whether or not it is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDetection {
    pub id: TagId,
    pub decoding: DecodingMetadata,
    pub px: [f64; 4],
    pub py: [f64; 4],
    pub cx: f64,
    pub cy: f64,
    pub observed_perimeter: f64,
}

impl From<&RawDetection> for ImageDetection {
    fn from(det: &RawDetection) -> Self {
        Self {
            id: det.id,
            decoding: det.decoding,
            px: det.corners.map(|c| c[0]),
            py: det.corners.map(|c| c[1]),
            cx: det.center[0],
            cy: det.center[1],
            observed_perimeter: det.observed_perimeter,
        }
    }
}

/// Everything produced for one input frame.
///
/// `poses` and `detections` are built from the same filtered set and
/// correspond index by index; `image_detections` covers every raw detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOutputBundle {
    pub header: FrameHeader,
    pub poses: Vec<ResolvedPose>,
    pub detections: Vec<TagDetection>,
    pub image_detections: Vec<ImageDetection>,
    pub annotated_image: Option<ImageMessage>,
}

impl FrameOutputBundle {
    pub fn empty(header: FrameHeader) -> Self {
        Self {
            header,
            poses: Vec::new(),
            detections: Vec::new(),
            image_detections: Vec::new(),
            annotated_image: None,
        }
    }

    /// Channel-1 view: bare poses under the frame header.
    pub fn pose_array(&self) -> PoseArray {
        PoseArray {
            header: self.header.clone(),
            poses: self.poses.iter().map(|p| p.pose).collect(),
        }
    }
}

/// A named frame registration for the transform graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedTransform {
    /// Stamp and parent frame.
    pub header: FrameHeader,
    pub child_frame_id: String,
    pub transform: Pose,
}

impl From<&ResolvedPose> for StampedTransform {
    fn from(pose: &ResolvedPose) -> Self {
        Self {
            header: pose.header.clone(),
            child_frame_id: pose.source_frame.clone(),
            transform: pose.pose,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the output bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"tagpose::tag_detections"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the output bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    PoseArray(PoseArray),
    TagDetections {
        header: FrameHeader,
        detections: Vec<TagDetection>,
    },
    ImageDetections {
        header: FrameHeader,
        detections: Vec<ImageDetection>,
    },
    AnnotatedImage(ImageMessage),
    Transform(StampedTransform),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for configuration, geometry, decoding and delivery
/// failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagError {
    #[error("Config Error{}: {details}", entry_suffix(.entry))]
    Config {
        entry: Option<usize>,
        details: String,
    },

    #[error("Degenerate Geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Invalid Intrinsics: {0}")]
    InvalidIntrinsics(String),

    #[error("Image Decode Error: {0}")]
    ImageDecode(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("I/O Error: {0}")]
    Io(String),
}

fn entry_suffix(entry: &Option<usize>) -> String {
    entry
        .map(|i| format!(" in tag_descriptions[{i}]"))
        .unwrap_or_default()
}
