use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingPosition {
    pub document_id: String,
    pub version_id: Option<String>,
    pub render_index: usize,
}

impl ReadingPosition {
    pub fn new(document_id: impl Into<String>, version_id: Option<&str>, render_index: usize) -> Self {
        Self {
            document_id: document_id.into(),
            version_id: version_id.map(str::to_string),
            render_index,
        }
    }
}

/// Positions the reader left by jumping, browser style.
///
/// Going back moves the current position onto the forward stack; a fresh
/// jump clears it.
#[derive(Debug)]
pub struct NavigationHistory {
    back: VecDeque<ReadingPosition>,
    forward: Vec<ReadingPosition>,
    capacity: usize,
}

impl NavigationHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            back: VecDeque::with_capacity(capacity),
            forward: Vec::new(),
            capacity,
        }
    }

    /// Record that the reader jumped away from `origin`
    pub fn record(&mut self, origin: ReadingPosition) {
        self.forward.clear();
        if self.back.back() != Some(&origin) {
            self.back.push_back(origin);
        }
        if self.back.len() > self.capacity {
            self.back.pop_front();
        }
    }

    /// Position to return to from `current`
    pub fn back(&mut self, current: ReadingPosition) -> Option<ReadingPosition> {
        let target = self.back.pop_back()?;
        self.forward.push(current);
        Some(target)
    }

    /// Undo the last [`back`](Self::back) from `current`
    pub fn forward(&mut self, current: ReadingPosition) -> Option<ReadingPosition> {
        let target = self.forward.pop()?;
        self.back.push_back(current);
        Some(target)
    }

    pub fn can_go_back(&self) -> bool {
        !self.back.is_empty()
    }

    pub fn can_go_forward(&self) -> bool {
        !self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.back.clear();
        self.forward.clear();
    }
}
