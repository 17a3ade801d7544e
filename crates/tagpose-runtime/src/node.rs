//! [`TagDetectorNode`] – the per-frame image callback.
//!
//! Wires the pipeline stages together for one `(image, camera_info)` pair:
//!
//! ```text
//! decode ─▶ gray ─▶ TagDetector ─▶ FrameAssembler ─┬─▶ annotate (optional)
//!                                                  ├─▶ FrameBroadcaster
//!                                                  └─▶ OutputMultiplexer
//! ```
//!
//! Frames are handled one at a time and synchronously.  A frame whose image
//! cannot be decoded is dropped before anything is published.

use std::time::Duration;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tagpose_middleware::{MessageSink, OutputMultiplexer, PublishReport};
use tagpose_perception::{FrameBroadcaster, MarkerRegistry, broadcast};
use tagpose_types::{CameraInfo, FrameHeader, ImageMessage, RawDetection, TagError};
use tracing::{debug, error, instrument, warn};

use crate::annotate::annotate;
use crate::assembler::{Assembly, FrameAssembler};
use crate::image_io::{decode, encode_rgb, to_gray};
use crate::throttle::DEFAULT_WARN_PERIOD;

/// Black-box marker detector: grayscale image in, raw detections out.
pub trait TagDetector {
    fn detect(&self, image: &GrayImage) -> Vec<RawDetection>;
}

/// Runtime switches for [`TagDetectorNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Replaces the image header's frame id on every output when set.
    pub sensor_frame_id: Option<String>,
    pub image_annotation_on: bool,
    /// Minimum spacing between "no description" warnings for one tag id.
    pub unregistered_warn_period: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            sensor_frame_id: None,
            image_annotation_on: true,
            unregistered_warn_period: DEFAULT_WARN_PERIOD,
        }
    }
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Detections returned by the detector.
    pub raw: usize,
    /// Detections that produced a pose.
    pub posed: usize,
    pub broadcast_failures: usize,
    pub publish: PublishReport,
}

pub struct TagDetectorNode<D: TagDetector, S: MessageSink, B: FrameBroadcaster> {
    detector: D,
    registry: MarkerRegistry,
    assembler: FrameAssembler,
    multiplexer: OutputMultiplexer<S>,
    broadcaster: B,
    settings: NodeSettings,
}

impl<D: TagDetector, S: MessageSink, B: FrameBroadcaster> TagDetectorNode<D, S, B> {
    pub fn new(
        detector: D,
        registry: MarkerRegistry,
        sink: S,
        broadcaster: B,
        settings: NodeSettings,
    ) -> Self {
        Self {
            detector,
            registry,
            assembler: FrameAssembler::new(settings.unregistered_warn_period),
            multiplexer: OutputMultiplexer::new(sink),
            broadcaster,
            settings,
        }
    }

    pub fn registry(&self) -> &MarkerRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn sink(&self) -> &S {
        self.multiplexer.sink()
    }

    pub fn broadcaster(&self) -> &B {
        &self.broadcaster
    }

    /// Process one frame.
    ///
    /// # Errors
    ///
    /// [`TagError::ImageDecode`] when the image cannot be decoded; nothing
    /// is published for that frame.
    #[instrument(
        name = "on_image",
        skip_all,
        fields(frame = %image.header.frame_id, stamp = %image.header.stamp)
    )]
    pub fn on_image(
        &self,
        image: &ImageMessage,
        camera_info: &CameraInfo,
    ) -> Result<FrameReport, TagError> {
        let mut canvas = decode(image).inspect_err(|e| {
            error!(error = %e, "dropping frame: image could not be decoded");
        })?;

        let raw = self.detector.detect(&to_gray(&canvas));
        let header = self.output_header(&image.header);
        let intrinsics = camera_info.intrinsics();

        let Assembly { mut bundle, posed } =
            self.assembler
                .assemble(&raw, &intrinsics, &self.registry, &header);

        if self.settings.image_annotation_on {
            let drawn: Vec<&RawDetection> = posed.iter().map(|&i| &raw[i]).collect();
            annotate(&mut canvas, &drawn);
            bundle.annotated_image = Some(encode_rgb(&header, &canvas));
        }

        let mut broadcast_failures = 0;
        for pose in &bundle.poses {
            if let Err(e) = broadcast(&self.broadcaster, pose) {
                warn!(frame = %pose.source_frame, error = %e, "transform broadcast failed");
                broadcast_failures += 1;
            }
        }

        let publish = self.multiplexer.publish(&bundle);
        debug!(raw = raw.len(), posed = bundle.poses.len(), "frame done");

        Ok(FrameReport {
            raw: raw.len(),
            posed: bundle.poses.len(),
            broadcast_failures,
            publish,
        })
    }

    fn output_header(&self, image_header: &FrameHeader) -> FrameHeader {
        match self.settings.sensor_frame_id.as_deref() {
            Some(frame) if !frame.is_empty() => FrameHeader::new(image_header.stamp, frame),
            _ => image_header.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;
    use tagpose_middleware::{EventBus, Topic};
    use tagpose_perception::SharedTfEngine;
    use tagpose_types::{
        DecodingMetadata, Event, EventPayload, MarkerDescription, StampedTransform,
    };

    struct FixedDetector(Vec<RawDetection>);

    impl TagDetector for FixedDetector {
        fn detect(&self, _image: &GrayImage) -> Vec<RawDetection> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(Topic, Event)>>);

    impl MessageSink for RecordingSink {
        fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, TagError> {
            self.0.lock().unwrap().push((topic, event));
            Ok(1)
        }
    }

    impl RecordingSink {
        fn topics(&self) -> Vec<Topic> {
            self.0.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    struct BrokenBroadcaster;

    impl FrameBroadcaster for BrokenBroadcaster {
        fn send_transform(&self, _transform: StampedTransform) -> Result<(), TagError> {
            Err(TagError::Channel("tf down".into()))
        }
    }

    fn tag0() -> RawDetection {
        RawDetection {
            id: 0,
            corners: [[270.0, 290.0], [370.0, 290.0], [370.0, 190.0], [270.0, 190.0]],
            center: [320.0, 240.0],
            observed_perimeter: 400.0,
            decoding: DecodingMetadata::default(),
        }
    }

    fn unregistered() -> RawDetection {
        RawDetection {
            id: 5,
            corners: [[20.0, 60.0], [60.0, 60.0], [60.0, 20.0], [20.0, 20.0]],
            center: [40.0, 40.0],
            observed_perimeter: 160.0,
            decoding: DecodingMetadata::default(),
        }
    }

    fn registry() -> MarkerRegistry {
        MarkerRegistry::from_descriptions([MarkerDescription {
            id: 0,
            size: 0.2,
            frame_name: "tag_0".into(),
        }])
    }

    fn frame(encoding: &str) -> (ImageMessage, CameraInfo) {
        let header = FrameHeader::new(Utc::now(), "usb_cam");
        let image = ImageMessage {
            header: header.clone(),
            width: 640,
            height: 480,
            encoding: encoding.to_string(),
            step: 640 * 3,
            data: vec![128; 640 * 480 * 3],
        };
        let info = CameraInfo {
            header,
            width: 640,
            height: 480,
            k: [600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0],
        };
        (image, info)
    }

    fn node<B: FrameBroadcaster>(
        broadcaster: B,
        settings: NodeSettings,
    ) -> TagDetectorNode<FixedDetector, RecordingSink, B> {
        TagDetectorNode::new(
            FixedDetector(vec![tag0(), unregistered()]),
            registry(),
            RecordingSink::default(),
            broadcaster,
            settings,
        )
    }

    #[test]
    fn frame_flows_to_every_channel() {
        let tf = SharedTfEngine::new();
        let node = node(tf.clone(), NodeSettings::default());
        let (image, info) = frame("bgr8");

        let report = node.on_image(&image, &info).unwrap();

        assert_eq!(report.raw, 2);
        assert_eq!(report.posed, 1);
        assert_eq!(report.broadcast_failures, 0);
        assert!(report.publish.is_clean());
        assert_eq!(
            node.sink().topics(),
            vec![
                Topic::TagDetectionsPose,
                Topic::TagDetections,
                Topic::TagImageDetections,
                Topic::TagDetectionsImage,
            ]
        );
        let t = tf.lookup("usb_cam", "tag_0").unwrap().unwrap();
        assert!((t.translation.vector.z - 1.2).abs() < 1e-9);
    }

    #[test]
    fn undecodable_frame_publishes_nothing() {
        let tf = SharedTfEngine::new();
        let node = node(tf.clone(), NodeSettings::default());
        let (image, info) = frame("yuv422");

        let err = node.on_image(&image, &info).unwrap_err();

        assert!(matches!(err, TagError::ImageDecode(_)));
        assert!(node.sink().topics().is_empty());
        assert!(tf.lookup("usb_cam", "tag_0").unwrap().is_none());
    }

    #[test]
    fn sensor_frame_override_replaces_header_frame() {
        let tf = SharedTfEngine::new();
        let settings = NodeSettings {
            sensor_frame_id: Some("camera_optical".into()),
            ..NodeSettings::default()
        };
        let node = node(tf.clone(), settings);
        let (image, info) = frame("rgb8");

        node.on_image(&image, &info).unwrap();

        let events = node.sink().0.lock().unwrap();
        match &events[0].1.payload {
            EventPayload::PoseArray(array) => {
                assert_eq!(array.header.frame_id, "camera_optical");
                assert_eq!(array.header.stamp, image.header.stamp);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        let annotated = events
            .iter()
            .find_map(|(_, e)| match &e.payload {
                EventPayload::AnnotatedImage(img) => Some(img.header.clone()),
                _ => None,
            })
            .expect("annotated image published");
        assert_eq!(annotated.frame_id, "camera_optical");
        assert_eq!(annotated.stamp, image.header.stamp);
        assert!(tf.lookup("camera_optical", "tag_0").unwrap().is_some());
        assert!(tf.lookup("usb_cam", "tag_0").unwrap().is_none());
    }

    #[test]
    fn empty_override_keeps_image_frame() {
        let settings = NodeSettings {
            sensor_frame_id: Some(String::new()),
            ..NodeSettings::default()
        };
        let tf = SharedTfEngine::new();
        let node = node(tf.clone(), settings);
        let (image, info) = frame("rgb8");
        node.on_image(&image, &info).unwrap();
        assert!(tf.lookup("usb_cam", "tag_0").unwrap().is_some());
    }

    #[test]
    fn annotation_off_skips_image_channel() {
        let settings = NodeSettings {
            image_annotation_on: false,
            ..NodeSettings::default()
        };
        let node = node(SharedTfEngine::new(), settings);
        let (image, info) = frame("rgb8");

        let report = node.on_image(&image, &info).unwrap();

        assert_eq!(report.publish.attempted(), 3);
        assert!(!node.sink().topics().contains(&Topic::TagDetectionsImage));
    }

    #[test]
    fn annotation_draws_only_posed_tags() {
        let node = node(SharedTfEngine::new(), NodeSettings::default());
        let (image, info) = frame("rgb8");
        node.on_image(&image, &info).unwrap();

        let events = node.sink().0.lock().unwrap();
        let annotated = events
            .iter()
            .find_map(|(_, e)| match &e.payload {
                EventPayload::AnnotatedImage(img) => Some(img.clone()),
                _ => None,
            })
            .unwrap();
        let canvas = decode(&annotated).unwrap();
        // Registered tag outline is drawn.
        assert_eq!(canvas.get_pixel(320, 290).0, [255, 0, 0]);
        // Unregistered tag is left alone.
        assert_eq!(canvas.get_pixel(40, 60).0, [128, 128, 128]);
    }

    #[test]
    fn broadcast_failures_are_counted_not_fatal() {
        let node = node(BrokenBroadcaster, NodeSettings::default());
        let (image, info) = frame("rgb8");

        let report = node.on_image(&image, &info).unwrap();

        assert_eq!(report.broadcast_failures, 1);
        assert_eq!(report.publish.attempted(), 4);
    }

    #[tokio::test]
    async fn bus_backed_node_delivers_to_subscribers() {
        let bus = EventBus::default();
        let mut detections = bus.subscribe_to(Topic::TagDetections);
        let mut tf_topic = bus.subscribe_to(Topic::Tf);
        let node = TagDetectorNode::new(
            FixedDetector(vec![tag0()]),
            registry(),
            bus.clone(),
            bus.clone(),
            NodeSettings::default(),
        );
        let (image, info) = frame("rgb8");
        node.on_image(&image, &info).unwrap();

        match detections.recv().await.unwrap().payload {
            EventPayload::TagDetections { detections, .. } => {
                assert_eq!(detections.len(), 1);
                assert_eq!(detections[0].id, 0);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        match tf_topic.recv().await.unwrap().payload {
            EventPayload::Transform(t) => assert_eq!(t.child_frame_id, "tag_0"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
