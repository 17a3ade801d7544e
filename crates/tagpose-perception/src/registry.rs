//! [`MarkerRegistry`] – static table of configured fiducial markers.
//!
//! The registry is built once from the `tag_descriptions` configuration
//! array and is read-only afterwards, so it can be shared between threads
//! without locking.  Each entry looks like:
//!
//! ```toml
//! tag_descriptions = [
//!   { id = 0, size = 0.2 },
//!   { id = 7, size = 0.163513, frame_id = "dock_marker" },
//! ]
//! ```
//!
//! `frame_id` defaults to `tag_<id>`.  How malformed entries are treated is
//! chosen with [`LoadPolicy`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tagpose_types::{MarkerDescription, TagError, TagId};
use tracing::{info, warn};

/// What [`MarkerRegistry::load`] does with an entry it cannot parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Log a warning and carry on with the remaining entries.
    #[default]
    SkipInvalid,
    /// Abort the load with the first entry's error.
    FailFast,
}

#[derive(Debug, Deserialize)]
struct TagDescriptionEntry {
    id: i64,
    size: f64,
    #[serde(default)]
    frame_id: Option<String>,
}

/// Marker id → physical description.
#[derive(Debug, Clone, Default)]
pub struct MarkerRegistry {
    descriptions: HashMap<TagId, MarkerDescription>,
}

impl MarkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from already-validated descriptions.  Later entries
    /// replace earlier ones with the same id.
    pub fn from_descriptions(descriptions: impl IntoIterator<Item = MarkerDescription>) -> Self {
        let mut registry = Self::new();
        for description in descriptions {
            registry.insert(description);
        }
        registry
    }

    /// Load the registry from the `tag_descriptions` configuration value.
    ///
    /// `None` yields an empty registry and a warning: every detection will
    /// then be reported as unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Config`] when `config` is not an array, or when
    /// an entry is malformed and `policy` is [`LoadPolicy::FailFast`].
    pub fn load(config: Option<&toml::Value>, policy: LoadPolicy) -> Result<Self, TagError> {
        let Some(config) = config else {
            warn!("no tag_descriptions configured; every detected tag will be unregistered");
            return Ok(Self::new());
        };

        let entries = config.as_array().ok_or_else(|| TagError::Config {
            entry: None,
            details: format!(
                "tag_descriptions must be an array, found {}",
                config.type_str()
            ),
        })?;

        let mut registry = Self::new();
        for (index, value) in entries.iter().enumerate() {
            match parse_entry(index, value) {
                Ok(description) => {
                    info!(
                        tag_id = description.id,
                        size = description.size,
                        frame = %description.frame_name,
                        "loaded tag description"
                    );
                    registry.insert(description);
                }
                Err(e) => match policy {
                    LoadPolicy::FailFast => return Err(e),
                    LoadPolicy::SkipInvalid => {
                        warn!(error = %e, "skipping malformed tag description");
                    }
                },
            }
        }
        Ok(registry)
    }

    fn insert(&mut self, description: MarkerDescription) {
        if let Some(previous) = self.descriptions.insert(description.id, description) {
            warn!(
                tag_id = previous.id,
                replaced_frame = %previous.frame_name,
                "duplicate tag description; keeping the later entry"
            );
        }
    }

    /// Description registered for `id`, if any.
    pub fn lookup(&self, id: TagId) -> Option<&MarkerDescription> {
        self.descriptions.get(&id)
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// Iterate over all descriptions in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &MarkerDescription> {
        self.descriptions.values()
    }
}

fn parse_entry(index: usize, value: &toml::Value) -> Result<MarkerDescription, TagError> {
    let bad = |details: String| TagError::Config {
        entry: Some(index),
        details,
    };

    let entry: TagDescriptionEntry = value.clone().try_into().map_err(|e| bad(e.to_string()))?;

    let id = TagId::try_from(entry.id).map_err(|_| bad(format!("id {} out of range", entry.id)))?;
    if !(entry.size.is_finite() && entry.size > 0.0) {
        return Err(bad(format!("size must be positive, got {}", entry.size)));
    }
    let frame_name = match entry.frame_id {
        Some(name) if name.trim().is_empty() => {
            return Err(bad("frame_id must not be empty".to_string()));
        }
        Some(name) => name,
        None => format!("tag_{id}"),
    };

    Ok(MarkerDescription {
        id,
        size: entry.size,
        frame_name,
    })
}
