//! [`OutputMultiplexer`] – fans one frame's records out to their topics.
//!
//! Every channel is attempted on its own: a failure on one topic is logged,
//! recorded in the [`PublishReport`] and never retried, and the remaining
//! topics are still published.  The annotated-image channel is only used
//! when the bundle carries an image.

use tagpose_types::{Event, EventPayload, FrameOutputBundle, TagError};
use tracing::{debug, warn};

use crate::bus::{MessageSink, Topic};

const DEFAULT_SOURCE: &str = "tagpose::detector";

/// Outcome of publishing one bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    /// Topics published successfully with their receiver counts.
    pub delivered: Vec<(Topic, usize)>,
    /// Topics whose publish failed.
    pub failures: Vec<(Topic, TagError)>,
}

impl PublishReport {
    /// `true` when no topic failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of topics a publish was attempted on.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }
}

/// Publishes [`FrameOutputBundle`]s through a [`MessageSink`].
pub struct OutputMultiplexer<S: MessageSink> {
    sink: S,
    source: String,
}

impl<S: MessageSink> OutputMultiplexer<S> {
    pub fn new(sink: S) -> Self {
        Self::with_source(sink, DEFAULT_SOURCE)
    }

    /// Stamp outgoing events with `source` instead of the default.
    pub fn with_source(sink: S, source: impl Into<String>) -> Self {
        Self {
            sink,
            source: source.into(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Publish every record of `bundle` on its topic.
    pub fn publish(&self, bundle: &FrameOutputBundle) -> PublishReport {
        let mut report = PublishReport::default();

        self.send(
            &mut report,
            Topic::TagDetectionsPose,
            EventPayload::PoseArray(bundle.pose_array()),
        );
        self.send(
            &mut report,
            Topic::TagDetections,
            EventPayload::TagDetections {
                header: bundle.header.clone(),
                detections: bundle.detections.clone(),
            },
        );
        self.send(
            &mut report,
            Topic::TagImageDetections,
            EventPayload::ImageDetections {
                header: bundle.header.clone(),
                detections: bundle.image_detections.clone(),
            },
        );
        if let Some(image) = &bundle.annotated_image {
            self.send(
                &mut report,
                Topic::TagDetectionsImage,
                EventPayload::AnnotatedImage(image.clone()),
            );
        }

        report
    }

    fn send(&self, report: &mut PublishReport, topic: Topic, payload: EventPayload) {
        match self
            .sink
            .publish_to(topic, Event::new(self.source.as_str(), payload))
        {
            Ok(receivers) => {
                debug!(topic = %topic, receivers, "published");
                report.delivered.push((topic, receivers));
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "publish failed");
                report.failures.push((topic, e));
            }
        }
    }
}
