//! Named-pipe LED matrix daemon
//!
//! Waits for writers on a FIFO and draws the commands they send onto the
//! LED matrix. Writers may connect and disconnect freely; the service stops
//! on an `EXIT` command or on SIGINT/SIGTERM, clearing the panel first.
//!
//! ## Architecture
//! Everything runs on the main thread inside `service::serve`: the pipe
//! reader blocks on `read`, hands each chunk to the interpreter, and the
//! interpreter draws on the canvas before the next read. The only other
//! thread is ctrlc's handler, which flips the shutdown flag and wakes the
//! reader.
//!
//! Built without the `hardware` feature, the binary draws on an in-memory
//! framebuffer instead and can save it as a PNG on exit.
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/pipe-matrix --pipe /home/pi/scrimblopipe --rows 32 --cols 32
//! echo "FILL,0,0,0,255|10,20,255,0,0" > /home/pi/scrimblopipe
//! ```

use clap::Parser;
use pipe_matrix::pipe::{FifoStatus, PIPE_CAPACITY, PipeReader, ensure_fifo};
use pipe_matrix::service::serve;
use pipe_matrix::{MatrixOptions, PanelConfig, install_signal_handler};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Draw on an RGB LED matrix from commands written to a named pipe
#[derive(Parser)]
#[command(name = "pipe-matrix")]
#[command(version)]
struct Args {
    /// Named pipe to read commands from
    #[arg(long, default_value = "/home/pi/scrimblopipe")]
    pipe: PathBuf,

    /// Do not create the pipe if it is missing (opens are retried instead)
    #[arg(long)]
    no_create_pipe: bool,

    /// Largest chunk read from the pipe at once, in bytes
    #[arg(long, default_value_t = PIPE_CAPACITY)]
    chunk_capacity: usize,

    /// Number of rows on one LED panel
    #[arg(long, default_value = "32")]
    rows: u32,

    /// Number of columns on one LED panel
    #[arg(long, default_value = "32")]
    cols: u32,

    /// Panels daisy-chained per chain
    #[arg(long, default_value = "1")]
    chain_length: u32,

    /// Chains driven in parallel
    #[arg(long, default_value = "1")]
    parallel: u32,

    /// GPIO mapping name (e.g. regular, adafruit-hat)
    #[arg(long, default_value = "regular")]
    hardware_mapping: String,

    /// GPIO slowdown factor (faster Pis need 2 or more)
    #[arg(long, default_value = "1")]
    gpio_slowdown: u32,

    /// Print the refresh rate to the terminal
    #[arg(long)]
    show_refresh_rate: bool,

    /// BDF font to check at startup
    #[arg(long)]
    font: Option<PathBuf>,

    /// Save the framebuffer as a PNG on exit
    #[cfg(not(feature = "hardware"))]
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

impl Args {
    fn matrix_options(&self) -> MatrixOptions {
        MatrixOptions {
            panel: PanelConfig::new(self.rows, self.cols),
            chain_length: self.chain_length,
            parallel: self.parallel,
            hardware_mapping: self.hardware_mapping.clone(),
            gpio_slowdown: self.gpio_slowdown,
            show_refresh_rate: self.show_refresh_rate,
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let options = args.matrix_options();
    let canvas_panel = options.canvas_panel();

    tracing::info!("Pipe matrix v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Canvas: {}x{} ({} pixels, mapping {})",
        canvas_panel.cols,
        canvas_panel.rows,
        canvas_panel.pixel_count(),
        options.hardware_mapping
    );
    tracing::info!("Pipe: {}", args.pipe.display());

    if let Some(font) = &args.font {
        check_font(font);
    }

    // The canvas comes first: without it there is nothing to serve.
    #[cfg(feature = "hardware")]
    let canvas = pipe_matrix::canvas::LedPanel::new(&options)
        .map_err(|e| format!("Failed to initialize LED matrix: {e}"))?;
    #[cfg(not(feature = "hardware"))]
    let canvas = pipe_matrix::canvas::FrameCanvas::new(canvas_panel);

    let shutdown = install_signal_handler(args.pipe.clone())?;

    match ensure_fifo(&args.pipe, !args.no_create_pipe)? {
        FifoStatus::Existing => {}
        FifoStatus::Created => tracing::info!("Created named pipe {}", args.pipe.display()),
        FifoStatus::Missing => tracing::warn!(
            "{} does not exist yet; waiting for it to appear",
            args.pipe.display()
        ),
    }

    let reader = PipeReader::new(&args.pipe).with_capacity(args.chunk_capacity);
    tracing::debug!("Reading up to {} bytes per chunk", reader.capacity());

    #[cfg(feature = "hardware")]
    let before_teardown = |_: &pipe_matrix::canvas::LedPanel| {};
    #[cfg(not(feature = "hardware"))]
    let before_teardown = |canvas: &pipe_matrix::canvas::FrameCanvas| {
        if let Some(path) = &args.snapshot {
            match canvas.save_png(path) {
                Ok(()) => tracing::info!("Saved snapshot to {}", path.display()),
                Err(e) => tracing::warn!("Failed to save snapshot {}: {}", path.display(), e),
            }
        }
    };

    // Dropping the canvas here releases the matrix.
    let _ = serve(canvas, reader, &shutdown, before_teardown);
    tracing::info!("Shutting down cleanly.");
    Ok(())
}

/// Check that the bitmap font loads. Nothing on the pipe path draws text,
/// so a failure is only worth a warning.
#[cfg(feature = "hardware")]
fn check_font(path: &Path) {
    match rpi_led_matrix::LedFont::new(path) {
        Ok(_) => tracing::info!("Font: {}", path.display()),
        Err(e) => tracing::warn!("Couldn't load font '{}': {}", path.display(), e),
    }
}

#[cfg(not(feature = "hardware"))]
fn check_font(path: &Path) {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => tracing::info!("Font: {}", path.display()),
        Ok(_) => tracing::warn!("Couldn't load font '{}': not a file", path.display()),
        Err(e) => tracing::warn!("Couldn't load font '{}': {}", path.display(), e),
    }
}
