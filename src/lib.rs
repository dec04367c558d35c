//! Drive an RGB LED matrix from text commands written to a named pipe.
//!
//! Any local process can draw on the panel by writing to the pipe, e.g.
//! `echo "FILL,0,0,0,255|10,20,255,0,0" > /home/pi/scrimblopipe`.
//!
//! This module holds the pieces every other module leans on:
//! - Panel geometry and matrix options
//! - The `Color` type used at the hardware boundary
//! - The cooperative shutdown flag and its signal handler
//!
//! The protocol, interpreter, canvas, and pipe reader live in their own
//! modules and are wired together by `service::serve`.

pub mod canvas;
pub mod interpreter;
pub mod pipe;
pub mod protocol;
pub mod service;

#[cfg(feature = "hardware")]
use rpi_led_matrix::{LedMatrix, LedMatrixOptions, LedRuntimeOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// ── Panel configuration ────────────────────────────────────────────

/// Dimensions of a single LED panel (or of the whole chained canvas).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanelConfig {
    pub rows: u32,
    pub cols: u32,
}

impl PanelConfig {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    /// Total number of pixels on the panel, saturating at `u32::MAX`.
    pub fn pixel_count(&self) -> u32 {
        self.rows.saturating_mul(self.cols)
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self { rows: 32, cols: 32 }
    }
}

/// Everything needed to bring up the matrix driver.
///
/// Defaults match a single 32x32 panel on a plain GPIO hookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatrixOptions {
    pub panel: PanelConfig,
    /// Panels daisy-chained horizontally.
    pub chain_length: u32,
    /// Chains driven in parallel (stacked vertically).
    pub parallel: u32,
    pub hardware_mapping: String,
    pub gpio_slowdown: u32,
    pub show_refresh_rate: bool,
}

impl MatrixOptions {
    /// Size of the drawable canvas once chaining and parallel chains are
    /// taken into account. Oversized options saturate instead of wrapping.
    pub fn canvas_panel(&self) -> PanelConfig {
        PanelConfig::new(
            self.panel.rows.saturating_mul(self.parallel.max(1)),
            self.panel.cols.saturating_mul(self.chain_length.max(1)),
        )
    }
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            panel: PanelConfig::default(),
            chain_length: 1,
            parallel: 1,
            hardware_mapping: "regular".to_string(),
            gpio_slowdown: 1,
            show_refresh_rate: false,
        }
    }
}

// ── Color ──────────────────────────────────────────────────────────

/// Our own color type, decoupled from the hardware crate.
///
/// This lets the protocol and the headless canvas be tested without
/// `rpi-led-matrix`. At the hardware boundary, we convert via `Into<LedColor>`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Convert our Color to the hardware crate's LedColor at the boundary.
#[cfg(feature = "hardware")]
impl From<Color> for rpi_led_matrix::LedColor {
    fn from(c: Color) -> Self {
        rpi_led_matrix::LedColor {
            red: c.r,
            green: c.g,
            blue: c.b,
        }
    }
}

// ── Matrix initialization ──────────────────────────────────────────

/// Create the matrix driver from our options.
///
/// Fails when the process lacks GPIO access (not root) or the options are
/// rejected by the C library.
#[cfg(feature = "hardware")]
pub fn create_matrix(options: &MatrixOptions) -> Result<LedMatrix, Box<dyn std::error::Error>> {
    let mut led_options = LedMatrixOptions::new();
    led_options.set_rows(options.panel.rows);
    led_options.set_cols(options.panel.cols);
    led_options.set_chain_length(options.chain_length);
    led_options.set_parallel(options.parallel);
    led_options.set_hardware_mapping(&options.hardware_mapping);
    led_options.set_refresh_rate(options.show_refresh_rate);

    let mut rt_options = LedRuntimeOptions::new();
    rt_options.set_gpio_slowdown(options.gpio_slowdown);

    let matrix = LedMatrix::new(Some(led_options), Some(rt_options))?;

    Ok(matrix)
}

// ── Shutdown ───────────────────────────────────────────────────────

/// Cooperative shutdown flag shared between the signal handler and the
/// pipe loop.
///
/// Besides the request itself, the pipe loop acknowledges when it has
/// returned, so the handler knows when to stop poking the pipe.
///
/// # Rust concept: Arc and AtomicBool
/// Cloning a `Shutdown` clones the `Arc`s, so every clone observes the
/// same flags. `AtomicBool` needs no mutex for a single bool.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    acknowledged: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Mark the pipe loop as finished.
    pub fn acknowledge(&self) {
        self.acknowledged.store(true, Ordering::SeqCst);
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }
}

/// Install a SIGINT/SIGTERM handler that requests shutdown.
///
/// ctrlc runs the closure on its own thread rather than in signal context,
/// so after flipping the flag it can also poke the pipe: a reader blocked
/// in `open` waiting for a writer would otherwise never see the flag. The
/// reader may only be about to block when the signal lands, so the handler
/// keeps poking until the loop acknowledges or the attempts run out.
pub fn install_signal_handler(pipe_path: PathBuf) -> Result<Shutdown, ctrlc::Error> {
    let shutdown = Shutdown::new();
    let flag = shutdown.clone();

    ctrlc::set_handler(move || {
        flag.request();
        pipe::wake_until_acknowledged(&flag, &pipe_path, WAKE_ATTEMPTS, WAKE_INTERVAL);
    })?;

    Ok(shutdown)
}

const WAKE_ATTEMPTS: u32 = 100;
const WAKE_INTERVAL: Duration = Duration::from_millis(20);

// ── Tests ──────────────────────────────────────────────────────────
