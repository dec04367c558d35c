//! The pipe-driven service: reader, interpreter and canvas wired together.
//!
//! The canvas is cleared before the first read and again once the reader
//! stops, whether that was an `EXIT` command or a signal, so the panel is
//! never left lit after the service goes away.

use crate::Shutdown;
use crate::canvas::Canvas;
use crate::interpreter::Interpreter;
use crate::pipe::{PipeReader, ReaderExit};

/// Run the pipe loop against `canvas` until it stops, then clear the canvas
/// and hand it back.
///
/// `before_teardown` sees the final frame before the clear (used for PNG
/// snapshots of the headless canvas).
pub fn serve<C, F>(
    mut canvas: C,
    mut reader: PipeReader,
    shutdown: &Shutdown,
    before_teardown: F,
) -> (C, ReaderExit)
where
    C: Canvas,
    F: FnOnce(&C),
{
    canvas.clear();

    let mut interpreter = Interpreter::new(canvas).with_shutdown(shutdown.clone());
    tracing::info!("Waiting for commands on {}", reader.path().display());

    let exit = reader.run(shutdown, |chunk| interpreter.interpret(chunk));

    let totals = interpreter.totals();
    match exit {
        ReaderExit::Stopped => tracing::info!("Stopped by EXIT command"),
        ReaderExit::Shutdown => tracing::info!("Stopped by signal"),
    }
    tracing::info!(
        "Handled {} batch(es), {} command(s), {} malformed batch(es)",
        totals.batches,
        totals.commands,
        totals.malformed_batches
    );

    let mut canvas = interpreter.into_canvas();
    before_teardown(&canvas);
    canvas.clear();
    tracing::info!("Canvas cleared");

    (canvas, exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::testing::{Mutation, RecordingCanvas};
    use crate::pipe::{FifoStatus, ensure_fifo, wake_until_acknowledged};
    use crate::protocol::RawColor;
    use pretty_assertions::assert_eq;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fifo(tmp: &TempDir) -> PathBuf {
        let path = tmp.path().join("pipe");
        assert_eq!(ensure_fifo(&path, true).unwrap(), FifoStatus::Created);
        path
    }

    #[test]
    fn exit_command_clears_before_and_after() {
        let tmp = TempDir::new().unwrap();
        let path = fifo(&tmp);

        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            let mut pipe = OpenOptions::new().write(true).open(&writer_path).unwrap();
            pipe.write_all(b"1,2,3,4,5|EXIT").unwrap();
        });

        let mut frame_before_teardown = Vec::new();
        let (canvas, exit) = serve(
            RecordingCanvas::default(),
            PipeReader::new(&path),
            &Shutdown::new(),
            |canvas| frame_before_teardown = canvas.mutations.clone(),
        );

        writer.join().unwrap();
        assert_eq!(exit, ReaderExit::Stopped);
        assert_eq!(
            frame_before_teardown,
            vec![
                Mutation::Clear,
                Mutation::SetPixel(1, 2, RawColor::new(3, 4, 5)),
            ]
        );
        assert_eq!(
            canvas.mutations,
            vec![
                Mutation::Clear,
                Mutation::SetPixel(1, 2, RawColor::new(3, 4, 5)),
                Mutation::Clear,
            ]
        );
    }

    #[test]
    fn signal_clears_before_and_after() {
        let tmp = TempDir::new().unwrap();
        let path = fifo(&tmp);
        let shutdown = Shutdown::new();

        let service_shutdown = shutdown.clone();
        let service_path = path.clone();
        let service = thread::spawn(move || {
            serve(
                RecordingCanvas::default(),
                PipeReader::new(service_path),
                &service_shutdown,
                |_| {},
            )
        });

        thread::sleep(Duration::from_millis(50));
        shutdown.request();
        assert!(wake_until_acknowledged(
            &shutdown,
            &path,
            200,
            Duration::from_millis(10)
        ));

        let (canvas, exit) = service.join().unwrap();
        assert_eq!(exit, ReaderExit::Shutdown);
        assert_eq!(canvas.mutations, vec![Mutation::Clear, Mutation::Clear]);
    }
}
