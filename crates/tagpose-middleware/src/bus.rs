//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Publishing never blocks: a slow subscriber lags and loses
//! the oldest buffered events instead of stalling the pipeline.
//!
//! # Topics
//!
//! Traffic is partitioned into five [`Topic`] lanes, named after the
//! channels a tag detector node has always advertised:
//!
//! | Topic | Wire name | Payload |
//! |---|---|---|
//! | [`Topic::TagDetectionsPose`] | `tag_detections_pose` | pose array |
//! | [`Topic::TagDetections`] | `tag_detections` | `(id, size, pose)` records |
//! | [`Topic::TagImageDetections`] | `tag_image_detections` | pixel-space records |
//! | [`Topic::TagDetectionsImage`] | `tag_detections_image` | annotated image |
//! | [`Topic::Tf`] | `tf` | stamped frame registrations |

use std::fmt;

use tagpose_perception::FrameBroadcaster;
use tagpose_types::{Event, EventPayload, StampedTransform, TagError};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Source tag stamped on events the bus creates itself.
const BUS_SOURCE: &str = "tagpose-middleware::bus";

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Bare poses of every resolved marker under one frame header.
    TagDetectionsPose,
    /// Structured `(id, size, pose)` records.
    TagDetections,
    /// Pixel-space geometry of every detected marker, registered or not.
    TagImageDetections,
    /// Debug image with detected markers drawn on it.
    TagDetectionsImage,
    /// Marker frames registered relative to the camera.
    Tf,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::TagDetectionsPose,
        Topic::TagDetections,
        Topic::TagImageDetections,
        Topic::TagDetectionsImage,
        Topic::Tf,
    ];

    /// Wire name of the topic.
    pub fn name(self) -> &'static str {
        match self {
            Topic::TagDetectionsPose => "tag_detections_pose",
            Topic::TagDetections => "tag_detections",
            Topic::TagImageDetections => "tag_image_detections",
            Topic::TagDetectionsImage => "tag_detections_image",
            Topic::Tf => "tf",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything that can accept an [`Event`] on a [`Topic`].
///
/// [`EventBus`] is the production sink; tests substitute recorders and
/// failing sinks.
pub trait MessageSink {
    /// Deliver `event` on `topic`, returning how many consumers received it.
    fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, TagError>;
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    tag_detections_pose: broadcast::Sender<Event>,
    tag_detections: broadcast::Sender<Event>,
    tag_image_detections: broadcast::Sender<Event>,
    tag_detections_image: broadcast::Sender<Event>,
    tf: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (tag_detections_pose, _) = broadcast::channel(capacity);
        let (tag_detections, _) = broadcast::channel(capacity);
        let (tag_image_detections, _) = broadcast::channel(capacity);
        let (tag_detections_image, _) = broadcast::channel(capacity);
        let (tf, _) = broadcast::channel(capacity);
        Self {
            tag_detections_pose,
            tag_detections,
            tag_image_detections,
            tag_detections_image,
            tf,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Returns `Ok(0)` when no subscribers are currently listening on the
    /// topic (this is a normal condition, not an error).
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, TagError> {
        let sender = self.topic_sender(topic);
        if sender.receiver_count() == 0 {
            return Ok(0);
        }
        // A subscriber may drop between the count and the send.
        Ok(sender.send(event).unwrap_or(0))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::TagDetectionsPose => &self.tag_detections_pose,
            Topic::TagDetections => &self.tag_detections,
            Topic::TagImageDetections => &self.tag_image_detections,
            Topic::TagDetectionsImage => &self.tag_detections_image,
            Topic::Tf => &self.tf,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageSink for EventBus {
    fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, TagError> {
        EventBus::publish_to(self, topic, event)
    }
}

impl FrameBroadcaster for EventBus {
    fn send_transform(&self, transform: StampedTransform) -> Result<(), TagError> {
        self.publish_to(
            Topic::Tf,
            Event::new(BUS_SOURCE, EventPayload::Transform(transform)),
        )
        .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Take the next buffered event without waiting.
    ///
    /// Returns `None` when nothing is buffered or the bus has shut down.
    /// Lag is logged and skipped over.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "TopicReceiver lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tagpose_types::{FrameHeader, Pose, PoseArray};

    fn make_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::PoseArray(PoseArray {
                header: FrameHeader::new(Utc::now(), "camera"),
                poses: vec![Pose::default()],
            }),
        )
    }

    #[test]
    fn topic_names_match_wire_names() {
        let names: Vec<&str> = Topic::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "tag_detections_pose",
                "tag_detections",
                "tag_image_detections",
                "tag_detections_image",
                "tf"
            ]
        );
        assert_eq!(Topic::Tf.to_string(), "tf");
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        let delivered = bus
            .publish_to(Topic::TagDetections, make_event("test"))
            .unwrap();
        assert_eq!(delivered, 0);
    }

    /// Two independent subscribers on the same topic both receive the event.
    #[tokio::test]
    async fn every_topic_subscriber_gets_the_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::TagDetectionsPose);
        let mut subscriber2 = bus.subscribe_to(Topic::TagDetectionsPose);

        let event = make_event("node::camera");
        assert_eq!(bus.publish_to(Topic::TagDetectionsPose, event.clone())?, 2);

        assert_eq!(subscriber1.recv().await?.id, event.id);
        assert_eq!(subscriber2.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut tf_sub = bus.subscribe_to(Topic::Tf);
        let _pose_sub = bus.subscribe_to(Topic::TagDetectionsPose);

        bus.publish_to(Topic::TagDetectionsPose, make_event("node::camera"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), tf_sub.recv()).await;
        assert!(result.is_err(), "tf subscriber must not receive a pose event");
        Ok(())
    }

    /// Flooding a low-capacity channel while a subscriber sleeps must produce
    /// a `Lagged` error rather than panicking or blocking.
    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        let bus = EventBus::new(16);
        let mut slow_sub = bus.subscribe_to(Topic::TagImageDetections);

        for _ in 0..1_000 {
            bus.publish_to(Topic::TagImageDetections, make_event("flood"))
                .unwrap();
        }

        let result = slow_sub.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[test]
    fn try_recv_skips_lag_and_drains() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe_to(Topic::TagDetections);
        for _ in 0..10 {
            bus.publish_to(Topic::TagDetections, make_event("flood")).unwrap();
        }
        let mut drained = 0;
        while sub.try_recv().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 4);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn bus_broadcasts_transforms_on_tf_topic() {
        let bus = EventBus::default();
        let mut tf_sub = bus.subscribe_to(Topic::Tf);

        let transform = StampedTransform {
            header: FrameHeader::new(Utc::now(), "camera"),
            child_frame_id: "tag_4".to_string(),
            transform: Pose::default(),
        };
        bus.send_transform(transform.clone()).unwrap();

        let event = tf_sub.try_recv().unwrap();
        match event.payload {
            EventPayload::Transform(t) => assert_eq!(t, transform),
            other => panic!("unexpected payload: {other:?}"),
        }
        assert_eq!(event.source, BUS_SOURCE);
    }
}
