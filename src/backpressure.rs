//! In-flight write limiting for a response sender.
//!
//! A [`WriteGate`] admits one outstanding write per sender and refuses a
//! second one while the first is pending. A write must complete before the
//! next may start, which is what keeps body chunks in emission order.
//!
//! The gate never waits. Callers that want more data in flight must wait for
//! the previous write's completion themselves (the chunked subscriber only
//! requests the next item once its write resolves).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Lock-free single-slot gate for outstanding writes.
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    busy: Arc<AtomicBool>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a write holds the slot.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Take the slot, or fail with [`PipelineError::WriteInProgress`].
    ///
    /// The slot is released when the returned permit is dropped.
    pub fn try_acquire(&self) -> Result<WritePermit> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::WriteInProgress);
        }
        Ok(WritePermit {
            busy: self.busy.clone(),
        })
    }
}

/// Slot held for the duration of one write.
#[derive(Debug)]
pub struct WritePermit {
    busy: Arc<AtomicBool>,
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_allows_one() {
        let gate = WriteGate::new();
        assert!(!gate.is_saturated());

        let permit = gate.try_acquire().unwrap();
        assert!(gate.is_saturated());
        assert!(matches!(
            gate.try_acquire(),
            Err(PipelineError::WriteInProgress)
        ));

        drop(permit);
        assert!(!gate.is_saturated());
        assert!(gate.try_acquire().is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let gate = WriteGate::new();
        let other = gate.clone();

        let _permit = gate.try_acquire().unwrap();
        assert!(other.is_saturated());
        assert!(other.try_acquire().is_err());
    }
}
