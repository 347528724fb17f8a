//! The contract between the engine and sample consumers.
//!
//! An output receives batches of sample containers from the producers of a
//! test run. The engine's own ingester is one implementation; plugins that
//! forward samples elsewhere implement the same trait. The helpers here —
//! [`SampleBuffer`] and [`PeriodicFlusher`] — cover the common shape of an
//! output that buffers cheaply on the producer path and applies the buffered
//! work from its own thread.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use stampede_metrics::Samples;

/// An error from starting or stopping an output.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct OutputError(pub String);

/// A consumer of metric samples.
pub trait Output: Send {
    /// A human-readable description of the output.
    fn description(&self) -> String;

    /// Starts the output. Must return quickly; long-running work belongs on
    /// the output's own thread.
    fn start(&mut self) -> Result<(), OutputError>;

    /// Hands a batch of sample containers to the output. This runs on the
    /// producer path and must not block on I/O.
    fn add_metric_samples(&mut self, samples: Vec<Samples>);

    /// Stops the output. Returns only once all samples handed over before the
    /// call have been applied. Must be idempotent.
    fn stop(&mut self) -> Result<(), OutputError>;
}

/// A mutex-guarded holding pen for sample containers, for outputs that apply
/// samples from a flusher thread rather than inline.
#[derive(Default)]
pub struct SampleBuffer {
    buffer: Mutex<Vec<Samples>>,
}

impl SampleBuffer {
    /// Appends the containers to the buffer.
    pub fn add_metric_samples(&self, mut containers: Vec<Samples>) {
        self.buffer.lock().append(&mut containers);
    }

    /// Takes everything buffered so far, leaving the buffer empty.
    pub fn get_buffered_samples(&self) -> Vec<Samples> {
        std::mem::take(&mut *self.buffer.lock())
    }
}

/// Runs a callback on a fixed period from a dedicated thread, with one final
/// invocation on stop so nothing buffered is left behind.
pub struct PeriodicFlusher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicFlusher {
    /// Spawns the flusher thread.
    pub fn new(period: Duration, mut callback: impl FnMut() + Send + 'static) -> PeriodicFlusher {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::spawn(move || {
            let ticker = tick(period);
            loop {
                select! {
                    recv(ticker) -> _ => callback(),
                    recv(stop_rx) -> _ => {
                        callback();
                        return;
                    }
                }
            }
        });
        PeriodicFlusher { stop: stop_tx, handle }
    }

    /// Stops the flusher: triggers the final flush and waits for the thread
    /// to finish.
    pub fn stop(self) {
        drop(self.stop);
        self.handle.join().expect("flusher thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{PeriodicFlusher, SampleBuffer};

    #[test]
    fn test_sample_buffer_takes_everything() {
        let buffer = SampleBuffer::default();
        assert!(buffer.get_buffered_samples().is_empty());

        buffer.add_metric_samples(vec![Default::default(), Default::default()]);
        buffer.add_metric_samples(vec![Default::default()]);
        assert_eq!(buffer.get_buffered_samples().len(), 3);
        assert!(buffer.get_buffered_samples().is_empty());
    }

    #[test]
    fn test_flusher_flushes_on_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        // A long period, so the only guaranteed invocation is the final one.
        let flusher = PeriodicFlusher::new(Duration::from_secs(3600), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        flusher.stop();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flusher_ticks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let flusher = PeriodicFlusher::new(Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(60));
        flusher.stop();

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
