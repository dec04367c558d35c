//! Drawing surfaces the interpreter can target.
//!
//! The interpreter only needs five operations, so it talks to a small
//! `Canvas` trait instead of the `rpi-led-matrix` types directly. Two
//! implementations ship:
//! - `LedPanel` draws straight onto the physical matrix (`hardware` feature)
//! - `FrameCanvas` keeps an in-memory RGB framebuffer, used for headless
//!   runs and tests, and can be saved as a PNG
//!
//! Both clip out-of-bounds coordinates and clamp color channels, so the
//! interpreter can pass wire values through untouched.
//!
//! ## Rust concepts
//! - Traits with default methods (`clear` is `fill(black)` unless overridden)
//! - Blanket impls (`impl Canvas for &mut C`)
//! - `#[cfg(feature = ...)]` to compile hardware code only when available

use crate::protocol::RawColor;
use crate::{Color, PanelConfig};
use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;

#[cfg(feature = "hardware")]
use crate::{MatrixOptions, create_matrix};
#[cfg(feature = "hardware")]
use rpi_led_matrix::{LedCanvas, LedMatrix};

/// A mutable pixel surface addressed by `(x, y)`.
pub trait Canvas {
    fn width(&self) -> i32;

    fn height(&self) -> i32;

    /// Set one pixel. Coordinates outside the surface are ignored.
    fn set_pixel(&mut self, x: i32, y: i32, color: RawColor);

    /// Set every pixel.
    fn fill(&mut self, color: RawColor);

    fn clear(&mut self) {
        self.fill(RawColor::BLACK);
    }
}

impl<C: Canvas + ?Sized> Canvas for &mut C {
    fn width(&self) -> i32 {
        (**self).width()
    }

    fn height(&self) -> i32 {
        (**self).height()
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: RawColor) {
        (**self).set_pixel(x, y, color);
    }

    fn fill(&mut self, color: RawColor) {
        (**self).fill(color);
    }

    fn clear(&mut self) {
        (**self).clear();
    }
}

// ── In-memory framebuffer ────────────────────────────────────────────

/// Software canvas backed by an `image::RgbImage`.
pub struct FrameCanvas {
    frame: RgbImage,
}

impl FrameCanvas {
    /// A black framebuffer the size of `panel`.
    pub fn new(panel: PanelConfig) -> Self {
        Self {
            frame: RgbImage::new(panel.cols, panel.rows),
        }
    }

    pub fn frame(&self) -> &RgbImage {
        &self.frame
    }

    /// Color at `(x, y)`, or `None` outside the framebuffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.frame
            .get_pixel_checked(x, y)
            .map(|p| Color::new(p[0], p[1], p[2]))
    }

    /// Write the current frame as a PNG.
    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.frame.save_with_format(path, ImageFormat::Png)
    }
}

fn to_rgb(color: RawColor) -> Rgb<u8> {
    let c = color.to_color();
    Rgb([c.r, c.g, c.b])
}

impl Canvas for FrameCanvas {
    fn width(&self) -> i32 {
        self.frame.width() as i32
    }

    fn height(&self) -> i32 {
        self.frame.height() as i32
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: RawColor) {
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return;
        };
        if let Some(pixel) = self.frame.get_pixel_mut_checked(x, y) {
            *pixel = to_rgb(color);
        }
    }

    fn fill(&mut self, color: RawColor) {
        let rgb = to_rgb(color);
        for pixel in self.frame.pixels_mut() {
            *pixel = rgb;
        }
    }
}

// ── LED panel ────────────────────────────────────────────────────────

/// The physical matrix, drawn on directly (no double buffering).
///
/// Commands are incremental: a batch usually only touches the pixels that
/// changed. Swapping offscreen buffers would show a stale frame, so we draw
/// on the live canvas instead.
#[cfg(feature = "hardware")]
pub struct LedPanel {
    canvas: LedCanvas,
    // Owns the refresh thread; dropping it tears the panel down.
    _matrix: LedMatrix,
}

#[cfg(feature = "hardware")]
impl LedPanel {
    pub fn new(options: &MatrixOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let matrix = create_matrix(options)?;
        let canvas = matrix.canvas();
        Ok(Self {
            canvas,
            _matrix: matrix,
        })
    }
}

#[cfg(feature = "hardware")]
impl Canvas for LedPanel {
    fn width(&self) -> i32 {
        self.canvas.canvas_size().0
    }

    fn height(&self) -> i32 {
        self.canvas.canvas_size().1
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: RawColor) {
        // The C library ignores out-of-range coordinates itself.
        self.canvas.set(x, y, &color.to_color().into());
    }

    fn fill(&mut self, color: RawColor) {
        self.canvas.fill(&color.to_color().into());
    }

    fn clear(&mut self) {
        self.canvas.clear();
    }
}

// ── Test double ──────────────────────────────────────────────────────
