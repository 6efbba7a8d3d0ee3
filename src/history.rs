//! Bounded in-memory log of recent run reports for operators.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::pipeline::RunReport;

#[derive(Debug)]
pub struct RunHistory {
    inner: Mutex<VecDeque<RunReport>>,
    cap: usize,
}

impl RunHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RunReport>> {
        // Poisoned only if a pusher panicked; the deque itself is intact.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, report: RunReport) {
        let mut v = self.lock();
        v.push_back(report);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    pub fn latest(&self) -> Option<RunReport> {
        self.lock().back().cloned()
    }

    /// Oldest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<RunReport> {
        let v = self.lock();
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest() {
        let h = RunHistory::with_capacity(2);
        for reason in ["a", "b", "c"] {
            h.push(RunReport::aborted(reason));
        }
        assert_eq!(h.len(), 2);
        let last = h.snapshot_last_n(5);
        let reasons: Vec<_> = last.iter().map(|r| r.error.clone().unwrap()).collect();
        assert_eq!(reasons, vec!["b", "c"]);
        assert_eq!(h.latest().unwrap().error.as_deref(), Some("c"));
    }
}
