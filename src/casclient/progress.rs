//! Best-effort transfer progress
//!
//! Producers push onto a bounded channel with `try_send`; a full or
//! disconnected channel drops the event. The transfer never waits on it.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::CancelToken;

/// Snapshot of one transfer after a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpDownStatus {
    pub digest: String,
    pub filename: String,
    pub total_bytes: u64,
    pub processed_bytes: u64,
}

impl UpDownStatus {
    pub fn percent(&self) -> u64 {
        if self.total_bytes == 0 {
            return 100;
        }
        (self.processed_bytes.min(self.total_bytes) * 100) / self.total_bytes
    }
}

/// Sending half; cheap to clone
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: SyncSender<UpDownStatus>,
    dropped: Arc<AtomicU64>,
}

impl ProgressReporter {
    /// Non-blocking push
    pub fn report(&self, status: UpDownStatus) {
        match self.sender.try_send(status) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Events discarded because nobody kept up
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Bounded progress channel holding at most `capacity` pending events
pub fn progress_channel(capacity: usize) -> (ProgressReporter, Receiver<UpDownStatus>) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (
        ProgressReporter {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        receiver,
    )
}

const BAR_WIDTH: usize = 30;

fn render_line(status: &UpDownStatus) -> String {
    let filled = (status.percent() as usize * BAR_WIDTH) / 100;
    format!(
        "\r{} [{}{}] {:>3}% ({}/{} bytes)",
        status.filename,
        "=".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        status.percent(),
        status.processed_bytes,
        status.total_bytes
    )
}

/// Background consumer that redraws a text progress bar.
///
/// Stops when every reporter is dropped or the cancel token fires.
pub struct ProgressRenderer {
    handle: JoinHandle<u64>,
}

impl ProgressRenderer {
    pub fn spawn<W>(receiver: Receiver<UpDownStatus>, mut out: W, cancel: CancelToken) -> Self
    where
        W: Write + Send + 'static,
    {
        let handle = thread::spawn(move || {
            let mut drawn = 0u64;
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match receiver.recv_timeout(Duration::from_millis(100)) {
                    Ok(status) => {
                        // Rendering failures are not worth failing a transfer over.
                        let _ = write!(out, "{}", render_line(&status));
                        if status.processed_bytes >= status.total_bytes {
                            let _ = writeln!(out);
                        }
                        let _ = out.flush();
                        drawn += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            drawn
        });
        Self { handle }
    }

    /// Wait for the renderer to stop, returning how many updates it drew
    pub fn join(self) -> u64 {
        self.handle.join().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn status(processed: u64) -> UpDownStatus {
        UpDownStatus {
            digest: "sha256:00".into(),
            filename: "f.bin".into(),
            total_bytes: 100,
            processed_bytes: processed,
        }
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (reporter, receiver) = progress_channel(1);
        reporter.report(status(10));
        reporter.report(status(20));
        reporter.report(status(30));
        assert_eq!(reporter.dropped(), 2);
        assert_eq!(receiver.try_recv().unwrap().processed_bytes, 10);
    }

    #[test]
    fn test_disconnected_channel_drops() {
        let (reporter, receiver) = progress_channel(4);
        drop(receiver);
        reporter.report(status(10));
        assert_eq!(reporter.dropped(), 1);
    }

    #[test]
    fn test_percent() {
        assert_eq!(status(50).percent(), 50);
        let mut empty = status(0);
        empty.total_bytes = 0;
        assert_eq!(empty.percent(), 100);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_renderer_stops_when_reporters_drop() {
        let (reporter, receiver) = progress_channel(8);
        let buf = SharedBuf::default();
        let renderer = ProgressRenderer::spawn(receiver, buf.clone(), CancelToken::new());

        reporter.report(status(50));
        reporter.report(status(100));
        drop(reporter);

        assert_eq!(renderer.join(), 2);
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("100%"));
    }

    #[test]
    fn test_renderer_stops_on_cancel() {
        let (_reporter, receiver) = progress_channel(8);
        let cancel = CancelToken::new();
        let renderer = ProgressRenderer::spawn(receiver, std::io::sink(), cancel.clone());
        cancel.cancel();
        assert_eq!(renderer.join(), 0);
    }
}
