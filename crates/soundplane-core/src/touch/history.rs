//! Recent touch frames for observers

use std::collections::VecDeque;

use super::TouchArray;

/// Bounded ring of the most recent touch arrays, oldest first
#[derive(Debug, Clone)]
pub struct TouchHistory {
    frames: VecDeque<TouchArray>,
    capacity: usize,
}

impl TouchHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, touches: TouchArray) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(touches);
    }

    pub fn latest(&self) -> Option<&TouchArray> {
        self.frames.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TouchArray> {
        self.frames.iter()
    }

    pub fn to_vec(&self) -> Vec<TouchArray> {
        self.frames.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::touch::Touch;

    #[test]
    fn test_history_keeps_newest() {
        let mut history = TouchHistory::new(3);
        for i in 0..5 {
            history.push(TouchArray::from_slots([(0, Touch::new(i as f32, 0.0, 0.5))]));
        }
        assert_eq!(history.len(), 3);
        let xs: Vec<f32> = history.iter().map(|t| t.get(0).unwrap().x).collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0]);
        assert_eq!(history.latest().unwrap().get(0).unwrap().x, 4.0);
        history.clear();
        assert!(history.is_empty());
    }
}
