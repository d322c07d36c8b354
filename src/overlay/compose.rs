//! Pixel-level layout of an overlay frame.

use std::time::Duration;

use ab_glyph::FontVec;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

use super::text::{draw_caption, draw_panel};
use crate::core::settings::OverlaySettings;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([32, 32, 32]);
const TRACK: Rgb<u8> = Rgb([220, 220, 220]);
const BAND: Rgb<u8> = Rgb([236, 236, 236]);
const PLACEHOLDER: Rgb<u8> = Rgb([128, 128, 128]);

const ASPECT_W: u32 = 16;
const ASPECT_H: u32 = 9;
const HOUR: u64 = 3600;
const PANEL_MARGIN: u32 = 20;

/// Canvas regions, all in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub camera_x: u32,
    pub camera_y: u32,
    pub camera_width: u32,
    pub camera_height: u32,
    pub status_height: u32,
    pub footer_y: u32,
    pub footer_height: u32,
}

impl Layout {
    /// Camera at 85% height starting 5% down, status strip above, footer below.
    pub fn for_canvas(width: u32, height: u32) -> Self {
        let camera_y = height * 5 / 100;
        let camera_height = (height * 85 / 100).max(1);
        let camera_width = (camera_height * ASPECT_W / ASPECT_H).clamp(1, width);
        let footer_y = camera_y + camera_height;

        Self {
            camera_x: 0,
            camera_y,
            camera_width,
            camera_height,
            status_height: camera_y,
            footer_y,
            footer_height: (height * 10 / 100).min(height.saturating_sub(footer_y)),
        }
    }
}

/// Centre crop to 16:9.
pub fn crop_to_camera_aspect(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let scaled_width = width as u64 * ASPECT_H as u64;
    let scaled_height = height as u64 * ASPECT_W as u64;

    if scaled_width > scaled_height {
        let new_width = (height * ASPECT_W / ASPECT_H).max(1);
        let left = (width - new_width) / 2;
        imageops::crop_imm(image, left, 0, new_width, height).to_image()
    } else if scaled_width < scaled_height {
        let new_height = (width * ASPECT_H / ASPECT_W).max(1);
        let top = (height - new_height) / 2;
        imageops::crop_imm(image, 0, top, width, new_height).to_image()
    } else {
        image.clone()
    }
}

/// Downscale by `block`, then scale back up with nearest neighbour.
pub fn pixelate(image: &RgbImage, block: u32) -> RgbImage {
    if block <= 1 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let small = imageops::resize(
        image,
        (width / block).max(1),
        (height / block).max(1),
        FilterType::Triangle,
    );
    imageops::resize(&small, width, height, FilterType::Nearest)
}

pub fn desaturate(image: RgbImage) -> RgbImage {
    DynamicImage::ImageLuma8(imageops::grayscale(&image)).to_rgb8()
}

fn fill_rect(canvas: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let x_end = (x + width).min(canvas.width());
    let y_end = (y + height).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            canvas.put_pixel(px, py, color);
        }
    }
}

/// Camera panel: the prepared camera still, or a flat placeholder.
fn draw_camera(canvas: &mut RgbImage, layout: &Layout, camera: Option<&RgbImage>, overlay: &OverlaySettings) {
    let Some(camera) = camera else {
        fill_rect(
            canvas,
            layout.camera_x,
            layout.camera_y,
            layout.camera_width,
            layout.camera_height,
            PLACEHOLDER,
        );
        return;
    };

    let cropped = crop_to_camera_aspect(camera);
    let mut panel = imageops::resize(
        &cropped,
        layout.camera_width,
        layout.camera_height,
        FilterType::Lanczos3,
    );
    if overlay.mosaic_size > 1 {
        panel = pixelate(&panel, overlay.mosaic_size);
    }
    if overlay.grayscale {
        panel = desaturate(panel);
    }

    imageops::overlay(canvas, &panel, layout.camera_x as i64, layout.camera_y as i64);
}

/// Status strip: a bar filling over each hour of air time, one marker per
/// completed hour on the right.
fn draw_status(canvas: &mut RgbImage, layout: &Layout, elapsed: Duration) {
    let strip = layout.status_height;
    if strip < 3 {
        return;
    }

    let bar_height = (strip / 3).max(1);
    let bar_y = (strip - bar_height) / 2;
    let hours = elapsed.as_secs() / HOUR;
    let marker = bar_height;
    let markers_width = ((hours as u32).min(12) * (marker + 2)).min(layout.camera_width / 4);
    let track_width = layout.camera_width.saturating_sub(markers_width + 4);

    fill_rect(canvas, 0, bar_y, track_width, bar_height, TRACK);

    let progress = (elapsed.as_secs() % HOUR) as f64 / HOUR as f64;
    let filled = (track_width as f64 * progress) as u32;
    fill_rect(canvas, 0, bar_y, filled, bar_height, INK);

    let mut x = track_width + 4;
    for _ in 0..hours.min(12) {
        if x + marker > layout.camera_width {
            break;
        }
        fill_rect(canvas, x, bar_y, marker, marker, INK);
        x += marker + 2;
    }
}

/// Footer caption under the camera.
fn draw_footer(canvas: &mut RgbImage, layout: &Layout, overlay: &OverlaySettings, font: Option<&FontVec>) {
    if overlay.lower_text.trim().is_empty() || layout.footer_height == 0 {
        return;
    }

    fill_rect(
        canvas,
        0,
        layout.footer_y,
        layout.camera_width,
        layout.footer_height,
        BAND,
    );
    fill_rect(canvas, 0, layout.footer_y, layout.camera_width, 1, INK);

    if let Some(font) = font {
        draw_caption(
            canvas,
            font,
            &overlay.lower_text,
            PANEL_MARGIN / 2,
            layout.footer_y,
            layout.footer_height,
            INK,
        );
    }
}

/// Side panel right of the camera, rendered from `right_text`.
fn draw_side_panel(canvas: &mut RgbImage, layout: &Layout, overlay: &OverlaySettings, font: Option<&FontVec>) {
    let (width, height) = canvas.dimensions();
    if overlay.right_text.trim().is_empty() || layout.camera_width >= width {
        return;
    }

    fill_rect(canvas, layout.camera_width, 0, 1, height, TRACK);

    if let Some(font) = font {
        // 20px body text at 720p.
        let base_size = (height as f32 / 36.0).max(8.0);
        draw_panel(
            canvas,
            font,
            &overlay.right_text,
            layout.camera_width + PANEL_MARGIN,
            PANEL_MARGIN,
            height.saturating_sub(PANEL_MARGIN),
            base_size,
            INK,
        );
    }
}

pub fn compose(
    width: u32,
    height: u32,
    camera: Option<&RgbImage>,
    font: Option<&FontVec>,
    overlay: &OverlaySettings,
    elapsed: Duration,
) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(width, height, WHITE);
    let layout = Layout::for_canvas(width, height);

    draw_camera(&mut canvas, &layout, camera, overlay);
    draw_status(&mut canvas, &layout, elapsed);
    draw_footer(&mut canvas, &layout, overlay, font);
    draw_side_panel(&mut canvas, &layout, overlay, font);

    canvas
}
