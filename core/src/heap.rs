//! Binary min-heap priority queue with an injected comparator.
//!
//! This is the sole data structure backing the k-way merge: the
//! [`PriorityQueue::adjust_first_item`] operation exists specifically so a
//! merge loop that advanced the winning stream's cursor pays a single
//! O(log k) sift instead of a dequeue plus enqueue. All ordering goes through
//! the supplied [`Comparer`]; no natural ordering is assumed.

use std::cmp::Ordering;

use crate::error::{EngineError, Result};

/// Comparison strategy injected into the queue.
pub trait Comparer<T>: Send + Sync {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

/// Comparer that delegates to the type's `Ord` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<T: Ord> Comparer<T> for NaturalOrder {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}

/// Adapter turning a closure into a [`Comparer`].
pub struct FnComparer<F>(pub F);

impl<T, F> Comparer<T> for FnComparer<F>
where
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.0)(a, b)
    }
}

/// A binary min-heap ordered by an injected comparator.
pub struct PriorityQueue<T, C: Comparer<T>> {
    items: Vec<T>,
    comparer: C,
}

impl<T, C: Comparer<T>> PriorityQueue<T, C> {
    /// Create an empty queue using `comparer` for all ordering decisions.
    pub fn new(comparer: C) -> Self {
        Self {
            items: Vec::new(),
            comparer,
        }
    }

    /// Build a queue from an existing collection. Runs heapify in O(n).
    pub fn from_vec(items: Vec<T>, comparer: C) -> Self {
        let mut queue = Self { items, comparer };
        if queue.items.len() > 1 {
            for index in (0..queue.items.len() / 2).rev() {
                queue.sift_down(index);
            }
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the items in heap order (not sorted order).
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Add an item to the queue. O(log n).
    pub fn enqueue(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    /// The smallest item under the comparator.
    pub fn peek(&self) -> Result<&T> {
        self.items
            .first()
            .ok_or_else(|| EngineError::invalid_operation("peek on an empty priority queue"))
    }

    /// Mutable access to the smallest item. Callers that change its sort key
    /// must follow up with [`Self::adjust_first_item`] or [`Self::dequeue`].
    pub fn peek_mut(&mut self) -> Result<&mut T> {
        self.items
            .first_mut()
            .ok_or_else(|| EngineError::invalid_operation("peek on an empty priority queue"))
    }

    /// Remove and return the smallest item. O(log n).
    pub fn dequeue(&mut self) -> Result<T> {
        if self.items.is_empty() {
            return Err(EngineError::invalid_operation(
                "dequeue on an empty priority queue",
            ));
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let item = self.items.pop().expect("non-empty after check");
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        Ok(item)
    }

    /// Restore the heap property after the head was mutated in place.
    /// O(log n), versus O(log n) twice for a dequeue plus enqueue.
    pub fn adjust_first_item(&mut self) -> Result<()> {
        if self.items.is_empty() {
            return Err(EngineError::invalid_operation(
                "adjust_first_item on an empty priority queue",
            ));
        }
        self.sift_down(0);
        Ok(())
    }

    /// Remove the first item equal to `item`. Returns whether anything was
    /// removed.
    pub fn remove(&mut self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let Some(index) = self.items.iter().position(|candidate| candidate == item) else {
            return false;
        };
        let last = self.items.len() - 1;
        self.items.swap(index, last);
        self.items.pop();
        if index < self.items.len() {
            // The swapped-in element may violate the property in either
            // direction relative to its new neighbors.
            self.sift_down(index);
            self.sift_up(index);
        }
        true
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self
                .comparer
                .compare(&self.items[index], &self.items[parent])
                == Ordering::Less
            {
                self.items.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len
                && self.comparer.compare(&self.items[right], &self.items[left]) == Ordering::Less
            {
                smallest = right;
            }
            if self
                .comparer
                .compare(&self.items[smallest], &self.items[index])
                == Ordering::Less
            {
                self.items.swap(index, smallest);
                index = smallest;
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T, C: Comparer<T>>(mut queue: PriorityQueue<T, C>) -> Vec<T> {
        let mut out = Vec::new();
        while !queue.is_empty() {
            out.push(queue.dequeue().unwrap());
        }
        out
    }

    #[test]
    fn test_dequeue_yields_non_decreasing_order() {
        let mut queue = PriorityQueue::new(NaturalOrder);
        for value in [5, 1, 9, 3, 7, 2, 8, 2, 0, 6] {
            queue.enqueue(value);
        }
        let drained = drain(queue);
        assert_eq!(drained, vec![0, 1, 2, 2, 3, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_peek_returns_minimum() {
        let mut queue = PriorityQueue::new(NaturalOrder);
        queue.enqueue(10);
        assert_eq!(*queue.peek().unwrap(), 10);
        queue.enqueue(4);
        assert_eq!(*queue.peek().unwrap(), 4);
        queue.enqueue(7);
        assert_eq!(*queue.peek().unwrap(), 4);
    }

    #[test]
    fn test_from_vec_heapifies() {
        let queue = PriorityQueue::from_vec(vec![9, 3, 7, 1, 8, 1, 0], NaturalOrder);
        assert_eq!(drain(queue), vec![0, 1, 1, 3, 7, 8, 9]);
    }

    #[test]
    fn test_empty_queue_operations_fail() {
        let mut queue: PriorityQueue<i32, NaturalOrder> = PriorityQueue::new(NaturalOrder);
        assert!(queue.peek().is_err());
        assert!(queue.dequeue().is_err());
        assert!(queue.adjust_first_item().is_err());
    }

    #[test]
    fn test_adjust_first_item_matches_dequeue_enqueue() {
        let values = vec![4, 9, 2, 13, 6, 1, 11];

        let mut adjusted = PriorityQueue::from_vec(values.clone(), NaturalOrder);
        *adjusted.peek_mut().unwrap() = 8;
        adjusted.adjust_first_item().unwrap();

        let mut rebuilt = PriorityQueue::from_vec(values, NaturalOrder);
        rebuilt.dequeue().unwrap();
        rebuilt.enqueue(8);

        assert_eq!(drain(adjusted), drain(rebuilt));
    }

    #[test]
    fn test_remove_preserves_heap_property() {
        let mut queue = PriorityQueue::from_vec(vec![5, 3, 8, 1, 9, 2], NaturalOrder);
        assert!(queue.remove(&8));
        assert!(!queue.remove(&42));
        assert_eq!(drain(queue), vec![1, 2, 3, 5, 9]);
    }

    #[test]
    fn test_custom_comparer_reverses_order() {
        let mut queue = PriorityQueue::new(FnComparer(|a: &i32, b: &i32| b.cmp(a)));
        for value in [3, 1, 4, 1, 5] {
            queue.enqueue(value);
        }
        assert_eq!(drain(queue), vec![5, 4, 3, 1, 1]);
    }

    #[test]
    fn test_random_operation_sequence_keeps_invariant() {
        let mut queue = PriorityQueue::new(NaturalOrder);
        let mut model: Vec<i64> = Vec::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let value = (seed >> 33) as i64 % 100;
            if seed % 3 == 0 && !model.is_empty() {
                let expected = *model.iter().min().unwrap();
                let got = queue.dequeue().unwrap();
                assert_eq!(got, expected);
                let pos = model.iter().position(|v| *v == expected).unwrap();
                model.remove(pos);
            } else {
                queue.enqueue(value);
                model.push(value);
            }
            if !model.is_empty() {
                assert_eq!(*queue.peek().unwrap(), *model.iter().min().unwrap());
            }
        }
    }
}
