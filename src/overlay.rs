// src/overlay.rs
//
// Region overlay compositing.
//
// Per region, back to front in set order:
//
//   1. translucent fill   (fill_poly on a copy, add_weighted onto output)
//   2. opaque outline     (polylines, closed)
//   3. vertex markers     (filled circle + "P<n>" tag)
//   4. display name       (above the first vertex, label underneath)
//
// Then a fixed status line (counters top-left, wall clock bottom-left).
//
// Input frames are never written to; render() returns a fresh Mat.

use crate::region_store::RegionSnapshot;
use crate::types::{OverlayConfig, Region, Rgb, VisibilityPolicy};
use anyhow::Result;
use opencv::{
    core::{self, Mat, Point, Scalar, Vector},
    imgproc,
    prelude::*,
};

/// Fallback when a region's color is missing or malformed (#e040fb).
pub const DEFAULT_COLOR: Rgb = Rgb {
    r: 0xe0,
    g: 0x40,
    b: 0xfb,
};

/// Fixed overlay colors (BGR format for OpenCV).
pub mod colors {
    use opencv::core::Scalar;

    pub const VERTEX_MARKER: Scalar = Scalar::new(0.0, 255.0, 255.0, 0.0);
    pub const TEXT_WHITE: Scalar = Scalar::new(255.0, 255.0, 255.0, 0.0);
    pub const STATUS_GREEN: Scalar = Scalar::new(0.0, 255.0, 0.0, 0.0);
    pub const LABEL_GREY: Scalar = Scalar::new(200.0, 200.0, 200.0, 0.0);
}

// ============================================================================
// COLOR / GEOMETRY
// ============================================================================

/// Parse `RRGGBB`, with or without a leading `#`.
pub fn parse_hex_color(s: &str) -> Option<Rgb> {
    let hex = s.trim().strip_prefix('#').unwrap_or(s.trim());
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(Rgb {
        r: channel(0)?,
        g: channel(2)?,
        b: channel(4)?,
    })
}

impl Rgb {
    pub fn from_hex_or_default(s: &str) -> Rgb {
        parse_hex_color(s).unwrap_or(DEFAULT_COLOR)
    }

    pub fn to_scalar(self) -> Scalar {
        Scalar::new(self.b as f64, self.g as f64, self.r as f64, 0.0)
    }
}

/// Normalized coordinate to pixel, against the frame actually being drawn.
pub fn to_pixel(point: [f64; 2], width: i32, height: i32) -> Point {
    Point::new(
        (point[0] * width as f64).round() as i32,
        (point[1] * height as f64).round() as i32,
    )
}

// ============================================================================
// RENDERER
// ============================================================================

/// Values painted in the status line.
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub frame_index: u64,
    pub version: u64,
    pub timestamp: String,
}

pub struct RenderOutput {
    pub frame: Mat,
    pub drawn: usize,
    pub skipped: usize,
}

pub struct OverlayRenderer {
    fill_alpha: f64,
    outline_thickness: i32,
    vertex_radius: i32,
    visibility: VisibilityPolicy,
}

impl OverlayRenderer {
    pub fn new(config: &OverlayConfig) -> Self {
        Self {
            fill_alpha: config.fill_alpha.clamp(0.0, 1.0),
            outline_thickness: config.outline_thickness.max(1),
            vertex_radius: config.vertex_radius.max(1),
            visibility: config.visibility,
        }
    }

    fn should_draw(&self, region: &Region) -> bool {
        region.is_renderable()
            && match self.visibility {
                VisibilityPolicy::All => true,
                VisibilityPolicy::VisibleOnly => region.visible,
            }
    }

    /// Composite `snapshot` onto a copy of `frame`.
    pub fn render(
        &self,
        frame: &Mat,
        snapshot: &RegionSnapshot,
        status: &StatusLine,
    ) -> Result<RenderOutput> {
        let mut output = frame.try_clone()?;
        let width = output.cols();
        let height = output.rows();

        let mut drawn = 0;
        let mut skipped = 0;
        for region in snapshot.regions.iter() {
            if !self.should_draw(region) {
                skipped += 1;
                continue;
            }
            self.draw_region(&mut output, region, width, height)?;
            drawn += 1;
        }

        draw_status(&mut output, snapshot.len(), status, height)?;

        Ok(RenderOutput {
            frame: output,
            drawn,
            skipped,
        })
    }

    fn draw_region(&self, output: &mut Mat, region: &Region, width: i32, height: i32) -> Result<()> {
        let pixels: Vec<Point> = region
            .points
            .iter()
            .map(|p| to_pixel(*p, width, height))
            .collect();
        let color = Rgb::from_hex_or_default(&region.color).to_scalar();

        let mut contours: Vector<Vector<Point>> = Vector::new();
        contours.push(Vector::from_slice(&pixels));

        // Translucent interior
        let mut overlay = output.try_clone()?;
        imgproc::fill_poly(
            &mut overlay,
            &contours,
            color,
            imgproc::LINE_8,
            0,
            Point::new(0, 0),
        )?;
        let mut blended = Mat::default();
        core::add_weighted(
            &overlay,
            self.fill_alpha,
            &*output,
            1.0 - self.fill_alpha,
            0.0,
            &mut blended,
            -1,
        )?;
        blended.copy_to(output)?;

        imgproc::polylines(
            output,
            &contours,
            true,
            color,
            self.outline_thickness,
            imgproc::LINE_AA,
            0,
        )?;

        for (i, pt) in pixels.iter().enumerate() {
            imgproc::circle(
                output,
                *pt,
                self.vertex_radius,
                colors::VERTEX_MARKER,
                -1,
                imgproc::LINE_8,
                0,
            )?;
            imgproc::put_text(
                output,
                &format!("P{}", i + 1),
                Point::new(pt.x + 10, pt.y - 10),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                colors::TEXT_WHITE,
                2,
                imgproc::LINE_8,
                false,
            )?;
        }

        let anchor = pixels[0];
        imgproc::put_text(
            output,
            &region.name,
            Point::new(anchor.x, anchor.y - 25),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.7,
            colors::TEXT_WHITE,
            2,
            imgproc::LINE_8,
            false,
        )?;
        if let Some(label) = region.label.as_deref().filter(|l| !l.is_empty()) {
            imgproc::put_text(
                output,
                label,
                Point::new(anchor.x, anchor.y + 20),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                colors::LABEL_GREY,
                1,
                imgproc::LINE_8,
                false,
            )?;
        }

        Ok(())
    }
}

fn draw_status(output: &mut Mat, region_count: usize, status: &StatusLine, height: i32) -> Result<()> {
    let info = format!(
        "Frame: {} | Regions: {} | v{}",
        status.frame_index, region_count, status.version
    );
    imgproc::put_text(
        output,
        &info,
        Point::new(10, 30),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.7,
        colors::STATUS_GREEN,
        2,
        imgproc::LINE_8,
        false,
    )?;
    imgproc::put_text(
        output,
        &status.timestamp,
        Point::new(10, height - 10),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        colors::TEXT_WHITE,
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}
