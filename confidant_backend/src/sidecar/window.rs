use std::collections::VecDeque;

/// Bounded FIFO of the agent's final outbound texts, oldest evicted first.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(text.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Owned copy handed to assessors.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_entries_when_full() {
        let mut window = ConversationWindow::new(10);
        for i in 0..11 {
            window.push(format!("msg {i}"));
        }

        let snapshot = window.snapshot();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot.first().map(String::as_str), Some("msg 1"));
        assert_eq!(snapshot.last().map(String::as_str), Some("msg 10"));
    }

    #[test]
    fn clear_empties_window() {
        let mut window = ConversationWindow::new(3);
        window.push("a");
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 3);
    }
}
