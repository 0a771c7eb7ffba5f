//! Per-execution deadline guard.
//!
//! A watchdog thread waits on a channel for the timeout; if the guard is
//! still armed when it expires, it sets the cancellation flag the meter
//! polls. Dropping the guard disconnects the channel and joins the thread,
//! so no watchdog outlives its execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct DeadlineGuard {
    cancel: Arc<AtomicBool>,
    disarm: Option<mpsc::Sender<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl DeadlineGuard {
    /// Arm a watchdog that fires after `timeout`.
    pub fn arm(timeout: Duration) -> std::io::Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (disarm, disarmed) = mpsc::channel::<()>();
        let flag = Arc::clone(&cancel);
        let watchdog = thread::Builder::new()
            .name("scriptbox-deadline".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = disarmed.recv_timeout(timeout) {
                    flag.store(true, Ordering::SeqCst);
                }
            })?;
        Ok(Self {
            cancel,
            disarm: Some(disarm),
            watchdog: Some(watchdog),
        })
    }

    /// Flag handed to the meter.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn fired(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        drop(self.disarm.take());
        if let Some(watchdog) = self.watchdog.take() {
            let _ = watchdog.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_fires_after_timeout() {
        let guard = DeadlineGuard::arm(Duration::from_millis(20)).unwrap();
        let flag = guard.flag();
        let start = Instant::now();
        while !flag.load(Ordering::SeqCst) {
            assert!(start.elapsed() < Duration::from_secs(5), "watchdog never fired");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(guard.fired());
    }

    #[test]
    fn test_drop_disarms_without_waiting() {
        let start = Instant::now();
        let guard = DeadlineGuard::arm(Duration::from_secs(60)).unwrap();
        let flag = guard.flag();
        drop(guard);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!flag.load(Ordering::SeqCst));
    }
}
