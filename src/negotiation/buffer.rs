//! Candidate buffer.
//!
//! Transport fragments race the session descriptions across the relay, and a
//! fragment cannot be applied before a remote description exists. The buffer
//! holds them in arrival order until the session drains it.

use std::collections::VecDeque;

use crate::protocol::IceCandidate;

/// FIFO of fragments waiting for a remote description
#[derive(Debug, Clone, Default)]
pub struct CandidateBuffer {
    fragments: VecDeque<IceCandidate>,
    total_enqueued: u64,
}

impl CandidateBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment
    pub fn enqueue(&mut self, fragment: IceCandidate) {
        self.total_enqueued += 1;
        self.fragments.push_back(fragment);
    }

    /// Take every buffered fragment in arrival order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.fragments.drain(..).collect()
    }

    /// Discard all fragments (session teardown); returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.fragments.len();
        self.fragments.clear();
        dropped
    }

    /// Number of buffered fragments
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments enqueued over the buffer's lifetime
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"))
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut buffer = CandidateBuffer::new();
        for n in 1..=3 {
            buffer.enqueue(candidate(n));
        }

        let drained = buffer.drain();
        assert_eq!(drained, vec![candidate(1), candidate(2), candidate(3)]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut buffer = CandidateBuffer::new();
        buffer.enqueue(candidate(1));
        buffer.enqueue(candidate(2));

        assert_eq!(buffer.clear(), 2);
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.total_enqueued(), 2);
    }
}
