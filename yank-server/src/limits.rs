//! Upload quotas: per-visitor rate limiting and aggregate clipboard stats.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Sliding-window count of recent uploads per visitor. A visitor is the
/// source network identity of the request, normally the remote IP.
#[derive(Debug)]
pub struct VisitorTable {
    window: Duration,
    limit: u64,
    visitors: HashMap<String, Vec<Instant>>,
}

impl VisitorTable {
    pub fn new(window: Duration, limit: u64) -> Self {
        VisitorTable {
            window,
            limit,
            visitors: HashMap::new(),
        }
    }

    /// Whether the visitor may create another entry right now. Overwrites
    /// of existing ids must not be checked or recorded.
    pub fn allows(&mut self, visitor: &str) -> bool {
        if self.limit == 0 {
            return true;
        }
        self.prune(visitor);
        self.visitors
            .get(visitor)
            .map(|stamps| (stamps.len() as u64) < self.limit)
            .unwrap_or(true)
    }

    /// Record a successful entry creation for the visitor.
    pub fn record(&mut self, visitor: &str) {
        if self.limit == 0 {
            return;
        }
        self.visitors
            .entry(visitor.to_string())
            .or_default()
            .push(Instant::now());
    }

    fn prune(&mut self, visitor: &str) {
        // None when the process has been up for less than a window.
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        if let Some(stamps) = self.visitors.get_mut(visitor) {
            stamps.retain(|stamp| *stamp > cutoff);
            if stamps.is_empty() {
                self.visitors.remove(visitor);
            }
        }
    }

    /// Drop visitors whose whole window has elapsed, bounding table growth.
    pub fn prune_all(&mut self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        self.visitors.retain(|_, stamps| {
            stamps.retain(|stamp| *stamp > cutoff);
            !stamps.is_empty()
        });
    }
}

/// Running aggregate of stored entries. Adjusted optimistically on every
/// write and delete; the manager pass recomputes it from disk, so any drift
/// from racing writers heals on the next pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClipboardStats {
    pub count: u64,
    pub size: u64,
}

impl ClipboardStats {
    pub fn add_entry(&mut self, size: u64) {
        self.count += 1;
        self.size += size;
    }

    pub fn replace_entry(&mut self, old_size: u64, new_size: u64) {
        self.size = self.size.saturating_sub(old_size) + new_size;
    }

    pub fn remove_entry(&mut self, size: u64) {
        self.count = self.count.saturating_sub(1);
        self.size = self.size.saturating_sub(size);
    }
}
