//! Node configuration – reads a TOML file such as:
//!
//! ```toml
//! sensor_frame_id = "camera_optical"
//! image_annotation_on = true
//! unregistered_warn_period_secs = 10.0
//! strict_tag_descriptions = false
//! tag_descriptions = [
//!   { id = 0, size = 0.2 },
//!   { id = 7, size = 0.163513, frame_id = "dock_marker" },
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use tagpose_perception::{LoadPolicy, MarkerRegistry};
use tagpose_runtime::{DEFAULT_WARN_PERIOD, NodeSettings};
use tagpose_types::TagError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Raw marker table; validated by [`MarkerRegistry::load`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_descriptions: Option<toml::Value>,

    /// Frame id stamped on outputs instead of the image's own.  Empty means
    /// "keep the image frame".
    #[serde(default)]
    pub sensor_frame_id: String,

    #[serde(default = "default_image_annotation_on")]
    pub image_annotation_on: bool,

    #[serde(default = "default_warn_period_secs")]
    pub unregistered_warn_period_secs: f64,

    /// Reject the whole table on the first malformed entry.
    #[serde(default)]
    pub strict_tag_descriptions: bool,
}

fn default_image_annotation_on() -> bool {
    true
}
fn default_warn_period_secs() -> f64 {
    DEFAULT_WARN_PERIOD.as_secs_f64()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tag_descriptions: None,
            sensor_frame_id: String::new(),
            image_annotation_on: default_image_annotation_on(),
            unregistered_warn_period_secs: default_warn_period_secs(),
            strict_tag_descriptions: false,
        }
    }
}

impl NodeConfig {
    pub fn load_policy(&self) -> LoadPolicy {
        if self.strict_tag_descriptions {
            LoadPolicy::FailFast
        } else {
            LoadPolicy::SkipInvalid
        }
    }

    pub fn build_registry(&self) -> Result<MarkerRegistry, TagError> {
        MarkerRegistry::load(self.tag_descriptions.as_ref(), self.load_policy())
    }

    pub fn to_settings(&self) -> NodeSettings {
        let period = self.unregistered_warn_period_secs;
        let unregistered_warn_period = Duration::try_from_secs_f64(period).unwrap_or_else(|e| {
            tracing::warn!(
                period,
                error = %e,
                "invalid unregistered_warn_period_secs; using default"
            );
            DEFAULT_WARN_PERIOD
        });
        NodeSettings {
            sensor_frame_id: Some(self.sensor_frame_id.trim())
                .filter(|f| !f.is_empty())
                .map(str::to_string),
            image_annotation_on: self.image_annotation_on,
            unregistered_warn_period,
        }
    }
}

/// Load the config and apply `TAGPOSE_*` overrides.  Returns `None` if the
/// file does not exist.
pub fn load(path: &Path) -> Result<Option<NodeConfig>, TagError> {
    let mut cfg = load_from(path)?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Parse the config at `path` without environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<NodeConfig>, TagError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| TagError::Io(format!("failed to read config at {}: {e}", path.display())))?;
    let cfg: NodeConfig = toml::from_str(&raw).map_err(|e| TagError::Config {
        entry: None,
        details: format!("failed to parse {}: {e}", path.display()),
    })?;
    Ok(Some(cfg))
}

/// Apply `TAGPOSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TAGPOSE_SENSOR_FRAME_ID` | `sensor_frame_id` |
/// | `TAGPOSE_IMAGE_ANNOTATION` | `image_annotation_on` (`true`/`false`/`1`/`0`) |
/// | `TAGPOSE_WARN_PERIOD_SECS` | `unregistered_warn_period_secs` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut NodeConfig) {
    if let Ok(v) = std::env::var("TAGPOSE_SENSOR_FRAME_ID") {
        cfg.sensor_frame_id = v;
    }
    if let Ok(v) = std::env::var("TAGPOSE_IMAGE_ANNOTATION")
        && let Some(on) = parse_flag(&v)
    {
        cfg.image_annotation_on = on;
    }
    if let Ok(v) = std::env::var("TAGPOSE_WARN_PERIOD_SECS")
        && let Ok(secs) = v.trim().parse::<f64>()
        && Duration::try_from_secs_f64(secs).is_ok()
    {
        cfg.unregistered_warn_period_secs = secs;
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env-var tests share process state.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("tagpose.toml");
        std::fs::write(&path, body).expect("write config");
        path
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join("absent.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn empty_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write_config(&dir, "");
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg, NodeConfig::default());
        assert!(cfg.image_annotation_on);
        assert_eq!(cfg.unregistered_warn_period_secs, 10.0);
        assert_eq!(cfg.load_policy(), LoadPolicy::SkipInvalid);
    }

    #[test]
    fn full_file_builds_registry_and_settings() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write_config(
            &dir,
            r#"
sensor_frame_id = "camera_optical"
image_annotation_on = false
unregistered_warn_period_secs = 2.5
tag_descriptions = [
  { id = 0, size = 0.2 },
  { id = 7, size = 0.163513, frame_id = "dock_marker" },
]
"#,
        );
        let cfg = load_from(&path).expect("load ok").expect("some");

        let registry = cfg.build_registry().expect("registry");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(7).unwrap().frame_name, "dock_marker");

        let settings = cfg.to_settings();
        assert_eq!(settings.sensor_frame_id.as_deref(), Some("camera_optical"));
        assert!(!settings.image_annotation_on);
        assert_eq!(settings.unregistered_warn_period, Duration::from_millis(2500));
    }

    #[test]
    fn strict_mode_fails_on_bad_entry() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write_config(
            &dir,
            r#"
strict_tag_descriptions = true
tag_descriptions = [{ id = 0, size = "big" }]
"#,
        );
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.load_policy(), LoadPolicy::FailFast);
        assert!(matches!(
            cfg.build_registry(),
            Err(TagError::Config { entry: Some(0), .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write_config(&dir, "image_annotation_on = ");
        assert!(matches!(load_from(&path), Err(TagError::Config { .. })));
    }

    #[test]
    fn blank_sensor_frame_means_no_override() {
        let cfg = NodeConfig {
            sensor_frame_id: "   ".into(),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.to_settings().sensor_frame_id, None);
    }

    #[test]
    fn negative_warn_period_falls_back_to_default() {
        let cfg = NodeConfig {
            unregistered_warn_period_secs: -1.0,
            ..NodeConfig::default()
        };
        assert_eq!(cfg.to_settings().unregistered_warn_period, DEFAULT_WARN_PERIOD);
    }

    #[test]
    fn oversized_warn_period_falls_back_to_default() {
        let cfg: NodeConfig =
            toml::from_str("unregistered_warn_period_secs = 1e20").expect("parse");
        assert_eq!(cfg.to_settings().unregistered_warn_period, DEFAULT_WARN_PERIOD);
    }

    #[test]
    fn apply_env_overrides_changes_sensor_frame() {
        let _guard = ENV_LOCK.lock().unwrap();
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe { std::env::set_var("TAGPOSE_SENSOR_FRAME_ID", "head_camera") };
        let mut cfg = NodeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.sensor_frame_id, "head_camera");
        unsafe { std::env::remove_var("TAGPOSE_SENSOR_FRAME_ID") };
    }

    #[test]
    fn apply_env_overrides_changes_annotation_flag() {
        let _guard = ENV_LOCK.lock().unwrap();
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe { std::env::set_var("TAGPOSE_IMAGE_ANNOTATION", "0") };
        let mut cfg = NodeConfig::default();
        apply_env_overrides(&mut cfg);
        assert!(!cfg.image_annotation_on);
        unsafe { std::env::remove_var("TAGPOSE_IMAGE_ANNOTATION") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe {
            std::env::set_var("TAGPOSE_IMAGE_ANNOTATION", "maybe");
            std::env::set_var("TAGPOSE_WARN_PERIOD_SECS", "-3");
        }
        let mut cfg = NodeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.unregistered_warn_period_secs, 10.0);

        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe { std::env::set_var("TAGPOSE_WARN_PERIOD_SECS", "1e20") };
        let mut cfg = NodeConfig::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.image_annotation_on);
        assert_eq!(cfg.unregistered_warn_period_secs, 10.0);
        unsafe {
            std::env::remove_var("TAGPOSE_IMAGE_ANNOTATION");
            std::env::remove_var("TAGPOSE_WARN_PERIOD_SECS");
        }
    }

    #[test]
    fn apply_env_overrides_changes_warn_period() {
        let _guard = ENV_LOCK.lock().unwrap();
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe { std::env::set_var("TAGPOSE_WARN_PERIOD_SECS", "30") };
        let mut cfg = NodeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.unregistered_warn_period_secs, 30.0);
        unsafe { std::env::remove_var("TAGPOSE_WARN_PERIOD_SECS") };
    }
}
