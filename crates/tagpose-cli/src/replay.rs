//! Recorded input for `tagpose replay`.
//!
//! A recording is a JSON document:
//!
//! ```json
//! {
//!   "frames": [
//!     {
//!       "stamp": "2024-05-01T12:00:00Z",
//!       "frame_id": "usb_cam",
//!       "width": 640,
//!       "height": 480,
//!       "k": [600, 0, 320, 0, 600, 240, 0, 0, 1],
//!       "image": "frames/0001.png",
//!       "detections": [
//!         { "id": 0, "corners": [[270,290],[370,290],[370,190],[270,190]],
//!           "center": [320,240], "observed_perimeter": 400 }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! `image` is optional and resolved relative to the recording; without it a
//! blank `mono8` frame of `width × height` is synthesised.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use image::GrayImage;
use serde::Deserialize;
use tagpose_middleware::MessageSink;
use tagpose_perception::FrameBroadcaster;
use tagpose_runtime::image_io::encode_rgb;
use tagpose_runtime::{TagDetector, TagDetectorNode};
use tagpose_types::{CameraInfo, FrameHeader, ImageMessage, RawDetection, TagError};
use tracing::error;

#[derive(Debug, Clone, Deserialize)]
pub struct Recording {
    pub frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self, TagError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            TagError::Io(format!("failed to read recording {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            TagError::Serialization(format!("invalid recording {}: {e}", path.display()))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedFrame {
    #[serde(default = "Utc::now")]
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    /// Row-major 3×3 camera matrix.
    pub k: [f64; 9],
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

impl RecordedFrame {
    /// Build the image and calibration messages for this frame.
    pub fn to_messages(&self, base_dir: &Path) -> Result<(ImageMessage, CameraInfo), TagError> {
        let header = FrameHeader::new(self.stamp, self.frame_id.as_str());
        let image = match &self.image {
            Some(rel) => {
                let path = base_dir.join(rel);
                let rgb = image::open(&path)
                    .map_err(|e| TagError::Io(format!("failed to open {}: {e}", path.display())))?
                    .to_rgb8();
                encode_rgb(&header, &rgb)
            }
            None => ImageMessage {
                header: header.clone(),
                width: self.width,
                height: self.height,
                encoding: "mono8".to_string(),
                step: self.width,
                data: vec![0; self.width as usize * self.height as usize],
            },
        };
        let info = CameraInfo {
            header,
            width: self.width,
            height: self.height,
            k: self.k,
        };
        Ok((image, info))
    }
}

/// Detector that returns whatever detections were loaded for the current
/// frame.  Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    current: Arc<Mutex<Vec<RawDetection>>>,
}

impl ReplayDetector {
    pub fn load(&self, detections: Vec<RawDetection>) {
        if let Ok(mut slot) = self.current.lock() {
            *slot = detections;
        }
    }
}

impl TagDetector for ReplayDetector {
    fn detect(&self, _image: &GrayImage) -> Vec<RawDetection> {
        self.current
            .lock()
            .map(|mut slot| std::mem::take(&mut *slot))
            .unwrap_or_default()
    }
}

/// Frame counts for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub processed: usize,
    /// Frames whose image could not be loaded or decoded.
    pub dropped: usize,
    pub posed: usize,
}

/// Feed every recorded frame through `node`, calling `after_frame` once per
/// frame (dropped ones included).  A frame that fails to load or decode is
/// logged and skipped.
pub fn replay_frames<S, B, E>(
    node: &TagDetectorNode<ReplayDetector, S, B>,
    detector: &ReplayDetector,
    recording: &Recording,
    base_dir: &Path,
    mut after_frame: impl FnMut() -> Result<(), E>,
) -> Result<ReplayStats, E>
where
    S: MessageSink,
    B: FrameBroadcaster,
{
    let mut stats = ReplayStats::default();
    for frame in &recording.frames {
        match frame.to_messages(base_dir) {
            Ok((image, camera_info)) => {
                detector.load(frame.detections.clone());
                match node.on_image(&image, &camera_info) {
                    Ok(report) => {
                        stats.processed += 1;
                        stats.posed += report.posed;
                    }
                    // Already logged by the node.
                    Err(_) => stats.dropped += 1,
                }
            }
            Err(e) => {
                error!(
                    stamp = %frame.stamp,
                    error = %e,
                    "dropping frame: image could not be loaded"
                );
                stats.dropped += 1;
            }
        }
        after_frame()?;
    }
    Ok(stats)
}
