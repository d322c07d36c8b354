//! The overlay that gets broadcast: a camera still framed by status strips.

pub mod compose;
pub mod text;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use ab_glyph::FontVec;
use image::RgbImage;

use crate::core::settings::{load_settings_from_file, OverlaySettings};
use crate::stream::errors::RenderError;
use crate::stream::frame::Frame;
use crate::stream::producer::Renderer;
use crate::stream::types::StreamConfig;

/// Decoded camera still, reused until the file changes.
struct CameraCache {
    path: PathBuf,
    modified: Option<SystemTime>,
    image: RgbImage,
}

/// Font loaded for a configured path. `font` is `None` when loading failed,
/// so a bad path is reported once rather than every tick.
struct FontCache {
    configured: Option<PathBuf>,
    font: Option<Arc<FontVec>>,
}

pub struct OverlayRenderer {
    settings_path: Option<PathBuf>,
    overlay: Mutex<OverlaySettings>,
    camera: Mutex<Option<CameraCache>>,
    font: Mutex<Option<FontCache>>,
}

impl OverlayRenderer {
    /// Re-reads the overlay section of `settings_path` on every render.
    pub fn new(settings_path: impl Into<PathBuf>, initial: OverlaySettings) -> Self {
        Self {
            settings_path: Some(settings_path.into()),
            overlay: Mutex::new(initial),
            camera: Mutex::new(None),
            font: Mutex::new(None),
        }
    }

    /// Renders with fixed overlay settings.
    pub fn fixed(overlay: OverlaySettings) -> Self {
        Self {
            settings_path: None,
            overlay: Mutex::new(overlay),
            camera: Mutex::new(None),
            font: Mutex::new(None),
        }
    }

    /// Latest overlay settings. A file that fails to load keeps the last good ones.
    fn current_overlay(&self) -> OverlaySettings {
        let mut overlay = self.overlay.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(path) = &self.settings_path {
            if path.exists() {
                match load_settings_from_file(path) {
                    Ok(settings) => *overlay = settings.overlay,
                    Err(e) => {
                        tracing::debug!(target: "overlay", "[OVERLAY] Keeping previous settings: {}", e);
                    }
                }
            }
        }

        overlay.clone()
    }

    fn camera_image(&self, path: &Path) -> Result<RgbImage, RenderError> {
        let modified = std::fs::metadata(path)
            .map_err(|e| RenderError::SourceUnavailable(format!("{}: {}", path.display(), e)))?
            .modified()
            .ok();

        let mut cache = self.camera.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.as_ref() {
            if cached.path == path && cached.modified == modified {
                return Ok(cached.image.clone());
            }
        }

        let image = image::open(path)
            .map_err(|e| RenderError::SourceUnavailable(format!("{}: {}", path.display(), e)))?
            .to_rgb8();

        tracing::info!(target: "overlay",
            "[OVERLAY] Loaded camera image {} ({}x{})", path.display(), image.width(), image.height());

        *cache = Some(CameraCache {
            path: path.to_path_buf(),
            modified,
            image: image.clone(),
        });
        Ok(image)
    }

    /// Font for the text panels. Without one the panels are drawn as bare bands.
    fn font(&self, configured: Option<&Path>) -> Option<Arc<FontVec>> {
        let mut cache = self.font.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.as_ref() {
            if cached.configured.as_deref() == configured {
                return cached.font.clone();
            }
        }

        let path = configured.map(Path::to_path_buf).or_else(text::default_font_path);
        let font = match &path {
            Some(path) => match text::load_font(path) {
                Ok(font) => {
                    tracing::info!(target: "overlay", "[OVERLAY] Using font {}", path.display());
                    Some(Arc::new(font))
                }
                Err(e) => {
                    tracing::warn!(target: "overlay", "[OVERLAY] Font unavailable, text panels left blank: {}", e);
                    None
                }
            },
            None => {
                tracing::warn!(target: "overlay", "[OVERLAY] No font configured or found, text panels left blank");
                None
            }
        };

        *cache = Some(FontCache {
            configured: configured.map(Path::to_path_buf),
            font: font.clone(),
        });
        font
    }

    /// Composes one canvas without going through a session.
    pub fn render_image(&self, width: u32, height: u32, elapsed: Duration) -> Result<RgbImage, RenderError> {
        let overlay = self.current_overlay();
        let camera = match &overlay.camera_image {
            Some(path) => Some(self.camera_image(path)?),
            None => None,
        };

        let font = self.font(overlay.font_path.as_deref());

        Ok(compose::compose(
            width,
            height,
            camera.as_ref(),
            font.as_deref(),
            &overlay,
            elapsed,
        ))
    }
}

impl Renderer for OverlayRenderer {
    fn render(&self, elapsed: Duration, config: &StreamConfig) -> Result<Frame, RenderError> {
        let resolution = config.resolution;
        let canvas = self.render_image(resolution.width, resolution.height, elapsed)?;
        Ok(Frame::from_rgb(resolution, canvas.into_raw())?)
    }
}
