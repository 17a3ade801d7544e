//! [`FrameAssembler`] – correlates one frame's detections with the marker
//! registry and assembles the parallel output records.
//!
//! For each raw detection, in input order:
//!
//! 1. its pixel-space record is appended to `image_detections`;
//! 2. an id missing from the registry is dropped, with a warning at most
//!    once per id per throttle window;
//! 3. otherwise the pose is resolved, and on success appended to both
//!    `poses` and `detections` under the frame header.
//!
//! A detection whose pose cannot be resolved is skipped; it never aborts the
//! frame.

use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use tagpose_perception::{HomographyResolver, MarkerRegistry, PoseResolver};
use tagpose_types::{
    CameraIntrinsics, FrameHeader, FrameOutputBundle, ImageDetection, RawDetection, ResolvedPose,
    TagDetection,
};
use tracing::{debug, instrument, warn};

use crate::throttle::DiagnosticThrottle;

/// Result of [`FrameAssembler::assemble`]: the bundle plus the input indices
/// of the detections that produced a pose.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub bundle: FrameOutputBundle,
    pub posed: Vec<usize>,
}

pub struct FrameAssembler<R: PoseResolver = HomographyResolver, C: Clock = DefaultClock> {
    resolver: R,
    throttle: DiagnosticThrottle<C>,
}

impl FrameAssembler {
    /// Assembler using the homography resolver and a wall-clock throttle.
    pub fn new(warn_period: Duration) -> Self {
        Self::with_parts(HomographyResolver, DiagnosticThrottle::new(warn_period))
    }
}

impl<R: PoseResolver, C: Clock> FrameAssembler<R, C> {
    pub fn with_parts(resolver: R, throttle: DiagnosticThrottle<C>) -> Self {
        Self { resolver, throttle }
    }

    pub fn throttle(&self) -> &DiagnosticThrottle<C> {
        &self.throttle
    }

    /// Build the output bundle for one frame.  No annotated image is set.
    pub fn process(
        &self,
        detections: &[RawDetection],
        intrinsics: &CameraIntrinsics,
        registry: &MarkerRegistry,
        header: &FrameHeader,
    ) -> FrameOutputBundle {
        self.assemble(detections, intrinsics, registry, header).bundle
    }

    #[instrument(
        name = "assemble",
        skip_all,
        fields(frame = %header.frame_id, raw = detections.len())
    )]
    pub fn assemble(
        &self,
        detections: &[RawDetection],
        intrinsics: &CameraIntrinsics,
        registry: &MarkerRegistry,
        header: &FrameHeader,
    ) -> Assembly {
        let mut bundle = FrameOutputBundle::empty(header.clone());
        let mut posed = Vec::new();

        for (index, det) in detections.iter().enumerate() {
            bundle.image_detections.push(ImageDetection::from(det));

            let Some(description) = registry.lookup(det.id) else {
                if self.throttle.allow(det.id) {
                    warn!(
                        tag_id = det.id,
                        "Found tag: {}, but no description was found for it", det.id
                    );
                }
                continue;
            };

            let pose = match self
                .resolver
                .resolve(&det.corners, description.size, intrinsics)
            {
                Ok(pose) => pose,
                Err(e) => {
                    debug!(tag_id = det.id, error = %e, "skipping detection");
                    continue;
                }
            };

            let resolved = ResolvedPose {
                header: header.clone(),
                source_frame: description.frame_name.clone(),
                pose,
            };
            bundle.detections.push(TagDetection {
                id: det.id,
                size: description.size,
                pose: resolved.clone(),
            });
            bundle.poses.push(resolved);
            posed.push(index);
        }

        debug!(
            posed = bundle.poses.len(),
            image_detections = bundle.image_detections.len(),
            "frame assembled"
        );
        Assembly { bundle, posed }
    }
}
