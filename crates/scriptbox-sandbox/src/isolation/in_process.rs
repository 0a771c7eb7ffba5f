//! In-process strategy: evaluate on the calling thread.
//!
//! Only one in-process execution may run per process at a time; callers
//! that cannot take the slot fall back to another strategy. The deadline
//! guard is armed before evaluation and disarmed on every exit path.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use super::deadline::DeadlineGuard;
use super::{output_from_evaluation, IsolationError, RunOutput};
use crate::env::Environment;
use crate::outcome::ExecutionOutcome;
use crate::runner::ResourceLimits;
use crate::script::{self, Meter, Stmt};

static SLOT_BUSY: AtomicBool = AtomicBool::new(false);

/// Ownership of the process-wide in-process slot. Released on drop.
#[derive(Debug)]
pub struct SlotGuard {
    _private: (),
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        SLOT_BUSY.store(false, Ordering::Release);
    }
}

/// Take the slot, or `None` if another in-process execution holds it.
pub fn try_acquire() -> Option<SlotGuard> {
    SLOT_BUSY
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .ok()
        .map(|_| SlotGuard { _private: () })
}

/// Run `program` while holding the slot.
pub fn execute(
    _slot: &SlotGuard,
    program: &[Stmt],
    env: &Environment,
    limits: &ResourceLimits,
) -> Result<RunOutput, IsolationError> {
    let guard = DeadlineGuard::arm(limits.timeout())?;
    let meter = Meter::new(limits.memory_mb, limits.cpu_secs)
        .with_cancel(guard.flag())
        .with_sampling();

    let result = panic::catch_unwind(AssertUnwindSafe(|| script::evaluate(program, env, meter)));
    drop(guard);

    Ok(match result {
        Ok(result) => output_from_evaluation(result, limits),
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            tracing::error!(detail = %detail, "Interpreter panicked");
            RunOutput::without_output(ExecutionOutcome::sandbox_failure(format!(
                "internal interpreter error: {}",
                detail
            )))
        }
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
