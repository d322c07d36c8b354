//! Text panels: the footer caption and the markdown-ish side panel.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_text_mut, text_size};

use crate::stream::errors::RenderError;

/// Looked up in order when no font is configured.
pub const FONT_CANDIDATES: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
];

const LINE_SPACING: f32 = 1.2;
const HEADING_SCALE: f32 = 1.5;

pub fn default_font_path() -> Option<PathBuf> {
    FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

pub fn load_font(path: &Path) -> Result<FontVec, RenderError> {
    let data = std::fs::read(path)
        .map_err(|e| RenderError::SourceUnavailable(format!("{}: {}", path.display(), e)))?;
    FontVec::try_from_vec(data)
        .map_err(|e| RenderError::SourceUnavailable(format!("{}: {}", path.display(), e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Heading,
    Bullet,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelLine<'a> {
    pub kind: LineKind,
    pub text: &'a str,
}

/// `# ` headings, `- `/`* ` bullets, everything else plain. Blank lines are dropped.
pub fn parse_panel(text: &str) -> Vec<PanelLine<'_>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            if let Some(rest) = line.strip_prefix("# ") {
                PanelLine { kind: LineKind::Heading, text: rest }
            } else if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
                PanelLine { kind: LineKind::Bullet, text: rest }
            } else {
                PanelLine { kind: LineKind::Plain, text: line }
            }
        })
        .collect()
}

/// Single line, vertically centred in the band `[y, y + height)`.
pub fn draw_caption(canvas: &mut RgbImage, font: &FontVec, text: &str, x: u32, y: u32, height: u32, color: Rgb<u8>) {
    let text = text.trim();
    if text.is_empty() || height == 0 {
        return;
    }

    let scale = PxScale::from(height as f32 * 0.6);
    let (_, text_height) = text_size(scale, font, text);
    let top = y as i32 + (height as i32 - text_height as i32) / 2;
    draw_text_mut(canvas, color, x as i32, top, scale, font, text);
}

/// Side panel starting at `(x, y)`. Lines past `max_y` are not drawn.
/// Returns the y just below the last drawn line.
#[allow(clippy::too_many_arguments)]
pub fn draw_panel(
    canvas: &mut RgbImage,
    font: &FontVec,
    text: &str,
    x: u32,
    y: u32,
    max_y: u32,
    base_size: f32,
    color: Rgb<u8>,
) -> u32 {
    let line_height = base_size * LINE_SPACING;
    let mut current = y as f32;

    for line in parse_panel(text) {
        let advance = match line.kind {
            LineKind::Heading => line_height * HEADING_SCALE,
            _ => line_height,
        };
        if current + advance > max_y as f32 {
            break;
        }

        let top = current as i32;
        match line.kind {
            LineKind::Heading => {
                let scale = PxScale::from(base_size * HEADING_SCALE);
                draw_text_mut(canvas, color, x as i32, top, scale, font, line.text);
            }
            LineKind::Bullet => {
                let radius = (base_size / 4.0).max(1.0) as i32;
                let centre = (x as i32 + radius, top + (base_size / 2.0) as i32);
                draw_filled_circle_mut(canvas, centre, radius, color);
                draw_text_mut(
                    canvas,
                    color,
                    x as i32 + radius * 3,
                    top,
                    PxScale::from(base_size),
                    font,
                    line.text,
                );
            }
            LineKind::Plain => {
                draw_text_mut(canvas, color, x as i32, top, PxScale::from(base_size), font, line.text);
            }
        }

        current += advance;
    }

    current as u32
}
