//! Execution meter polled by the evaluator on every statement and loop
//! iteration.
//!
//! Cancellation is checked on every tick; memory and CPU usage are sampled
//! every [`SAMPLE_EVERY`] ticks because reading them costs a syscall.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::error::Halt;
use crate::limiter;

/// Ticks between usage samples (power of two).
pub const SAMPLE_EVERY: u64 = 8192;

const MB: u64 = 1024 * 1024;

#[derive(Debug)]
pub struct Meter {
    cancel: Option<Arc<AtomicBool>>,
    ticks: u64,
    memory_limit_mb: u64,
    cpu_limit_secs: u64,
    sampling: Option<Baseline>,
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    rss: Option<u64>,
    cpu: Option<Duration>,
}

impl Meter {
    /// Meter that never halts; allocation checks use a generous ceiling.
    pub fn unlimited() -> Self {
        Self {
            cancel: None,
            ticks: 0,
            memory_limit_mb: u64::MAX / MB,
            cpu_limit_secs: u64::MAX,
            sampling: None,
        }
    }

    /// Meter enforcing size checks against `memory_mb`. CPU and RSS are only
    /// observed once [`Meter::with_sampling`] is called.
    pub fn new(memory_mb: u64, cpu_secs: u64) -> Self {
        Self {
            cancel: None,
            ticks: 0,
            memory_limit_mb: memory_mb,
            cpu_limit_secs: cpu_secs,
            sampling: None,
        }
    }

    /// Halts with [`Halt::Deadline`] once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Samples RSS growth and thread CPU time relative to this moment, on
    /// the calling thread.
    pub fn with_sampling(mut self) -> Self {
        self.sampling = Some(Baseline {
            rss: limiter::resident_bytes(),
            cpu: limiter::thread_cpu_time(),
        });
        self
    }

    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit_mb
    }

    #[inline]
    pub fn tick(&mut self) -> Result<(), Halt> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(Halt::Deadline);
            }
        }
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks & (SAMPLE_EVERY - 1) == 0 {
            self.sample()?;
        }
        Ok(())
    }

    fn sample(&self) -> Result<(), Halt> {
        let Some(baseline) = self.sampling else {
            return Ok(());
        };
        if let (Some(base), Some(now)) = (baseline.rss, limiter::resident_bytes()) {
            if now.saturating_sub(base) > self.memory_limit_mb.saturating_mul(MB) {
                return Err(self.memory_halt());
            }
        }
        if let (Some(base), Some(now)) = (baseline.cpu, limiter::thread_cpu_time()) {
            if now.saturating_sub(base) > Duration::from_secs(self.cpu_limit_secs) {
                return Err(Halt::Cpu {
                    limit_secs: self.cpu_limit_secs,
                });
            }
        }
        Ok(())
    }

    /// Rejects a single allocation that alone would exceed the ceiling.
    pub fn check_alloc(&self, bytes: u128) -> Result<(), Halt> {
        if bytes > self.memory_limit_mb as u128 * MB as u128 {
            return Err(self.memory_halt());
        }
        Ok(())
    }

    pub fn memory_halt(&self) -> Halt {
        Halt::Memory {
            limit_mb: self.memory_limit_mb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_halts() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut meter = Meter::new(64, 5).with_cancel(flag.clone());
        assert!(meter.tick().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert_eq!(meter.tick(), Err(Halt::Deadline));
    }

    #[test]
    fn test_check_alloc() {
        let meter = Meter::new(1, 5);
        assert!(meter.check_alloc(512 * 1024).is_ok());
        assert_eq!(
            meter.check_alloc(2 * 1024 * 1024),
            Err(Halt::Memory { limit_mb: 1 })
        );
        assert!(Meter::unlimited().check_alloc(1 << 40).is_ok());
    }

    #[test]
    fn test_sampling_without_growth_passes() {
        let mut meter = Meter::new(1024, 60).with_sampling();
        for _ in 0..(SAMPLE_EVERY * 2) {
            meter.tick().unwrap();
        }
    }
}
