use crate::shared::paths::ensure_dir;
use crate::stream::errors::ConfigError;
use crate::stream::types::{PixelLayout, StreamConfig, Visibility};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Persisted settings file. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Output resolution as `WIDTHxHEIGHT`.
    pub resolution: String,
    pub fps: u32,
    /// Seconds between two rendered overlay frames.
    pub interval: u64,
    pub youtube: YoutubeSettings,
    pub overlay: OverlaySettings,
    pub encoder: EncoderSettings,
    pub announce: AnnounceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution: "1280x720".to_string(),
            fps: 30,
            interval: 5,
            youtube: YoutubeSettings::default(),
            overlay: OverlaySettings::default(),
            encoder: EncoderSettings::default(),
            announce: AnnounceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeSettings {
    pub title: String,
    pub description: String,
    pub privacy: Visibility,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            title: "Live".to_string(),
            description: String::new(),
            privacy: Visibility::Unlisted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Still image used as the camera feed. `None` draws a flat placeholder.
    pub camera_image: Option<PathBuf>,
    /// Caption in the band under the camera.
    pub lower_text: String,
    /// Side panel. `# ` lines are headings, `- ` and `* ` lines are bullets.
    pub right_text: String,
    /// TrueType/OpenType font for the text panels. `None` picks a common system font.
    pub font_path: Option<PathBuf>,
    pub grayscale: bool,
    /// Pixelation block size; 0 disables the mosaic.
    pub mosaic_size: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            camera_image: None,
            lower_text: String::new(),
            right_text: "# Live\n- ".to_string(),
            font_path: None,
            grayscale: false,
            mosaic_size: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub program: String,
    pub preset: String,
    pub video_bitrate: String,
    pub max_bitrate: String,
    pub buffer_size: String,
    pub audio_bitrate: String,
    pub pixel_layout: PixelLayout,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            preset: "veryfast".to_string(),
            video_bitrate: "2500k".to_string(),
            max_bitrate: "3000k".to_string(),
            buffer_size: "5000k".to_string(),
            audio_bitrate: "96k".to_string(),
            pixel_layout: PixelLayout::Bgr24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnnounceSettings {
    /// Overrides the broadcast title as the announcement text.
    pub message: Option<String>,
    /// User-context bearer token for posting to X. Announcing is off without it.
    pub x_access_token: Option<String>,
}

/// Loads settings, falling back to defaults when the file is missing or broken.
pub fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        tracing::info!(target: "system", "Settings file {:?} not found, using defaults", path);
        return Settings::default();
    }

    match load_settings_from_file(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(target: "system", "Failed to load settings from {:?}: {}, using defaults", path, e);
            Settings::default()
        }
    }
}

pub fn load_settings_from_file(path: &Path) -> Result<Settings, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&contents)?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Merges `patch` into the stored settings file and writes it back.
///
/// Nested objects merge key by key; any other value replaces what was stored.
/// The merged document must still deserialize as [`Settings`] and describe a
/// valid stream, otherwise the file is left untouched.
pub fn update_settings(path: &Path, patch: &Value) -> Result<Settings, ConfigError> {
    let mut stored = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)?
    } else {
        Value::Object(serde_json::Map::new())
    };

    deep_merge(&mut stored, patch);
    let settings: Settings = serde_json::from_value(stored.clone())?;
    StreamConfig::from_settings(&settings)?;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&stored)?)?;

    Ok(settings)
}

pub fn deep_merge(original: &mut Value, updates: &Value) {
    match (original, updates) {
        (Value::Object(original), Value::Object(updates)) => {
            for (key, value) in updates {
                let nested = value.is_object()
                    && original.get(key).map_or(false, |existing| existing.is_object());

                if !nested {
                    original.insert(key.clone(), value.clone());
                } else if let Some(existing) = original.get_mut(key) {
                    deep_merge(existing, value);
                }
            }
        }
        (original, updates) => *original = updates.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"fps": 10, "youtube": {"title": "Night shift"}}"#).unwrap();

        assert_eq!(settings.fps, 10);
        assert_eq!(settings.resolution, "1280x720");
        assert_eq!(settings.youtube.title, "Night shift");
        assert_eq!(settings.youtube.privacy, Visibility::Unlisted);
        assert_eq!(settings.encoder.program, "ffmpeg");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = load_settings(&tmp.path().join("nope.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_corrupt_file_falls_back_but_strict_load_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_settings(&path), Settings::default());
        assert!(matches!(
            load_settings_from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_deep_merge_keeps_sibling_keys() {
        let mut original = json!({
            "fps": 30,
            "youtube": {"title": "old", "privacy": "public"}
        });
        deep_merge(&mut original, &json!({"youtube": {"title": "new"}, "interval": 2}));

        assert_eq!(
            original,
            json!({
                "fps": 30,
                "interval": 2,
                "youtube": {"title": "new", "privacy": "public"}
            })
        );
    }

    #[test]
    fn test_deep_merge_replaces_non_objects() {
        let mut original = json!({"overlay": {"mosaic_size": 4}});
        deep_merge(&mut original, &json!({"overlay": 7}));
        assert_eq!(original, json!({"overlay": 7}));
    }

    #[test]
    fn test_update_settings_writes_merged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("settings.json");

        update_settings(&path, &json!({"youtube": {"title": "first"}})).unwrap();
        let settings = update_settings(&path, &json!({"youtube": {"description": "d"}})).unwrap();

        assert_eq!(settings.youtube.title, "first");
        assert_eq!(settings.youtube.description, "d");
        assert_eq!(load_settings_from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_update_settings_rejects_invalid_patch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        save_settings(&path, &Settings::default()).unwrap();

        let result = update_settings(&path, &json!({"fps": "fast"}));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        assert_eq!(load_settings_from_file(&path).unwrap().fps, 30);
    }

    #[test]
    fn test_update_settings_rejects_invalid_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        save_settings(&path, &Settings::default()).unwrap();

        let result = update_settings(&path, &json!({"resolution": "641x360"}));
        assert!(matches!(result, Err(ConfigError::Resolution(_))));
        assert_eq!(load_settings_from_file(&path).unwrap().resolution, "1280x720");
    }
}
