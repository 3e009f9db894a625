//! Bounded, rolling log of user-visible status lines.

use std::collections::VecDeque;

use chrono::Local;

/// Default number of entries kept before the oldest are dropped.
pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLog {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StatusLog {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `message` stamped with the local wall-clock time.
    pub fn push(&mut self, message: impl AsRef<str>) {
        let stamp = Local::now().format("%H:%M:%S").to_string();
        self.push_stamped(&stamp, message);
    }

    pub fn push_stamped(&mut self, stamp: &str, message: impl AsRef<str>) {
        self.entries
            .push_back(format!("[{stamp}] {}", message.as_ref()));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entries_are_dropped_beyond_capacity() {
        let mut log = StatusLog::new(3);
        for i in 0..5 {
            log.push_stamped("10:00:00", format!("msg {i}"));
        }
        let entries: Vec<&str> = log.entries().collect();
        assert_eq!(
            entries,
            vec!["[10:00:00] msg 2", "[10:00:00] msg 3", "[10:00:00] msg 4"]
        );
        assert_eq!(log.latest(), Some("[10:00:00] msg 4"));
    }

    #[test]
    fn push_stamps_wall_clock_time() {
        let mut log = StatusLog::default();
        assert!(log.is_empty());
        log.push("Idle");
        let entry = log.latest().expect("entry");
        assert!(entry.starts_with('['));
        assert!(entry.ends_with("] Idle"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn zero_capacity_keeps_latest_entry() {
        let mut log = StatusLog::new(0);
        log.push_stamped("t", "a");
        log.push_stamped("t", "b");
        assert_eq!(log.len(), 1);
        assert_eq!(log.latest(), Some("[t] b"));
    }
}
