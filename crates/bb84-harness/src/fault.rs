//! Scripted fault injection for simulated collaborators.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

/// Fault applied to one engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineFault {
    /// Answer with an explicit error.
    Reject(String),
    /// Answer correctly after this delay instead of the default latency.
    Delay(Duration),
    /// Drop this many records from the end of an otherwise valid batch.
    ShortBatch(usize),
}

/// Fault applied to one cipher call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherFault {
    /// Answer with an explicit error.
    Reject(String),
    /// Answer correctly after this delay instead of the default latency.
    Delay(Duration),
}

/// FIFO of faults, one consumed per call. Calls past the end run clean.
#[derive(Debug)]
pub struct FaultQueue<F> {
    faults: Mutex<VecDeque<F>>,
}

impl<F> FaultQueue<F> {
    /// Empty queue.
    pub fn new() -> Self {
        Self { faults: Mutex::new(VecDeque::new()) }
    }

    /// Script a fault for the next unscripted call.
    pub fn push(&self, fault: F) {
        self.lock().push_back(fault);
    }

    /// Fault for the current call, if one is scripted.
    pub fn next(&self) -> Option<F> {
        self.lock().pop_front()
    }

    /// Faults still waiting.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<F>> {
        // The queue holds plain data; a panic elsewhere cannot leave it torn.
        self.faults.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<F> Default for FaultQueue<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_are_consumed_in_order() {
        let queue = FaultQueue::new();
        queue.push(CipherFault::Reject("first".into()));
        queue.push(CipherFault::Delay(Duration::from_secs(1)));

        assert_eq!(queue.next(), Some(CipherFault::Reject("first".into())));
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.next(), Some(CipherFault::Delay(Duration::from_secs(1))));
        assert_eq!(queue.next(), None);
    }
}
