//! Command interpreter: applies one pipe chunk to a canvas.
//!
//! Each chunk read from the pipe is parsed on its own. Nothing is carried
//! over between chunks, so a command split across two reads arrives as
//! two malformed halves and is dropped.
//!
//! Within a batch, commands run in order until one of:
//! - the end of the batch (`Outcome::Continue`)
//! - an `EXIT` command, or a shutdown request between commands
//!   (`Outcome::Stop`, later commands are discarded)
//! - a command that fails to parse (`Outcome::Continue`, the rest of the
//!   batch is abandoned because the delimiter offsets can no longer be
//!   trusted)
//!
//! ## Rust concepts
//! - Generic struct over a trait (`Interpreter<C: Canvas>`)
//! - `Option<Shutdown>` for an optional collaborator
//! - Consuming accessors (`into_canvas`) to hand ownership back

use crate::Shutdown;
use crate::canvas::Canvas;
use crate::protocol::{Command, EXIT_KEYWORD, ParseError, Tokens, batch_text, parse_command};

/// Whether the service should keep reading after a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Stop,
}

/// What happened to a single batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchReport {
    pub outcome: Outcome,
    /// Commands that mutated the canvas.
    pub applied: usize,
    /// The parse failure that abandoned the batch, if any.
    pub malformed: Option<ParseError>,
}

impl BatchReport {
    fn new() -> Self {
        Self {
            outcome: Outcome::Continue,
            applied: 0,
            malformed: None,
        }
    }
}

/// Running counters across every batch seen so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub batches: u64,
    pub commands: u64,
    pub malformed_batches: u64,
}

pub struct Interpreter<C: Canvas> {
    canvas: C,
    shutdown: Option<Shutdown>,
    totals: Totals,
}

impl<C: Canvas> Interpreter<C> {
    pub fn new(canvas: C) -> Self {
        Self {
            canvas,
            shutdown: None,
            totals: Totals::default(),
        }
    }

    /// Check `shutdown` between commands, so a signal stops the batch after
    /// the command in flight has been drawn.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn into_canvas(self) -> C {
        self.canvas
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    /// Apply one chunk and report whether to keep going.
    pub fn interpret(&mut self, chunk: &[u8]) -> Outcome {
        self.apply_batch(chunk).outcome
    }

    /// Apply one chunk and report what it did.
    pub fn apply_batch(&mut self, chunk: &[u8]) -> BatchReport {
        let text = batch_text(chunk);
        let text = text.trim();
        let mut report = BatchReport::new();
        self.totals.batches += 1;

        if text == EXIT_KEYWORD {
            tracing::info!("EXIT received");
            report.outcome = Outcome::Stop;
            return report;
        }

        if text.is_empty() {
            tracing::debug!("Ignoring empty batch");
            return report;
        }

        for (index, token) in Tokens::records(text).enumerate() {
            if self.shutdown_requested() {
                tracing::debug!("Shutdown requested, abandoning batch at command {}", index);
                report.outcome = Outcome::Stop;
                break;
            }

            match parse_command(token) {
                Ok(Command::Exit) => {
                    tracing::info!("EXIT received");
                    report.outcome = Outcome::Stop;
                    break;
                }
                Ok(Command::Clear) => self.canvas.clear(),
                Ok(Command::Fill(color)) => self.canvas.fill(color),
                Ok(Command::SetPixel { x, y, color }) => self.canvas.set_pixel(x, y, color),
                Err(err) => {
                    tracing::warn!(
                        "Malformed command {} ({:?}): {}; dropping rest of batch",
                        index,
                        token,
                        err
                    );
                    report.malformed = Some(err);
                    break;
                }
            }
            report.applied += 1;
        }

        self.totals.commands += report.applied as u64;
        if report.malformed.is_some() {
            self.totals.malformed_batches += 1;
        }

        tracing::debug!(
            "Batch done: {} command(s) applied, outcome {:?}",
            report.applied,
            report.outcome
        );
        report
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(Shutdown::is_requested)
    }
}
