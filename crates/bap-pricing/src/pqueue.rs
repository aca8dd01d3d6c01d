//! Binary heap with a switchable comparator.
//!
//! The column pool keeps its columns ordered by reduced cost most of the
//! time, but its ageing sweeps temporarily need the same storage ordered by
//! age. Instead of copying into a second structure, the heap's comparator
//! can be swapped and the heap rebuilt in place with [`resort`].
//!
//! The comparator is a plain function pointer; `Ordering::Less` means
//! "comes out first".

use std::cmp::Ordering;

pub type Compare<T> = fn(&T, &T) -> Ordering;

#[derive(Debug)]
pub struct PriorityQueue<T> {
    items: Vec<T>,
    cmp: Compare<T>,
}

impl<T> PriorityQueue<T> {
    pub fn new(cmp: Compare<T>) -> Self {
        PriorityQueue {
            items: Vec::new(),
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// The backing storage in heap order (only the root is meaningful).
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Mutable access to the backing storage; the caller must [`resort`]
    /// afterwards if keys were changed.
    pub fn items_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    /// Drains the storage without regard to ordering.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    pub fn insert(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let item = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        item
    }

    /// Replaces the comparator. The heap is *not* reordered; call
    /// [`resort`] to re-establish the heap property.
    pub fn set_comparator(&mut self, cmp: Compare<T>) {
        self.cmp = cmp;
    }

    /// Rebuilds the heap, e.g. after keys changed externally.
    pub fn resort(&mut self) {
        if self.items.len() < 2 {
            return;
        }
        for i in (0..self.items.len() / 2).rev() {
            self.sift_down(i);
        }
    }

    fn before(&self, a: usize, b: usize) -> bool {
        (self.cmp)(&self.items[a], &self.items[b]) == Ordering::Less
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.before(i, parent) {
                self.items.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.items.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < n && self.before(left, smallest) {
                smallest = left;
            }
            if right < n && self.before(right, smallest) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.items.swap(i, smallest);
            i = smallest;
        }
    }
}
