use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::registry::MediaRegistry;

/// Background loop advancing every registered video source at a fixed cadence,
/// independent of the render rate.
pub struct DecodeThread {
    shutdown: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl DecodeThread {
    pub fn spawn(registry: MediaRegistry, rate_hz: f32) -> anyhow::Result<Self> {
        let interval = Duration::from_secs_f32(1.0 / rate_hz.max(1.0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let cycles = Arc::new(AtomicU64::new(0));

        let thread = {
            let shutdown = shutdown.clone();
            let cycles = cycles.clone();
            thread::Builder::new()
                .name("quadmap-decode".into())
                .spawn(move || {
                    log::info!("Decode thread started ({:.0} Hz)", 1.0 / interval.as_secs_f32());
                    decode_loop(&registry, interval, &shutdown, &cycles);
                    log::info!("Decode thread exiting");
                })?
        };

        Ok(Self {
            shutdown,
            cycles,
            thread: Some(thread),
        })
    }

    /// Number of completed decode cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        if self.shutdown.load(Ordering::Relaxed) {
            return false;
        }
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal shutdown and join. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DecodeThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(
    registry: &MediaRegistry,
    interval: Duration,
    shutdown: &AtomicBool,
    cycles: &AtomicU64,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let started = Instant::now();
        run_cycle(registry);
        cycles.fetch_add(1, Ordering::Relaxed);
        thread::sleep(interval.saturating_sub(started.elapsed()));
    }
}

/// Advance each source in a snapshot exactly once.
/// A panicking source is disabled; the loop carries on with the rest.
pub fn run_cycle(registry: &MediaRegistry) {
    for source in registry.snapshot() {
        if source.is_released() {
            continue;
        }
        let result = catch_unwind(AssertUnwindSafe(|| source.advance()));
        if let Err(e) = result {
            let msg = if let Some(s) = e.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = e.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".into()
            };
            log::error!(
                "Decoder for {} panicked, disabling it: {msg}",
                source.path().display()
            );
            source.disable();
        }
    }
}
