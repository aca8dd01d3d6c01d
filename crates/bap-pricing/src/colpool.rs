//! Column pool: aged cache of generated columns across pricing rounds.
//!
//! Columns that were priced but not added to the master are parked here and
//! re-offered in later rounds as long as their reduced cost stays
//! attractive. The pool is a priority queue ordered by reduced cost; ageing
//! sweeps temporarily reorder it by age and always restore the reduced-cost
//! ordering before returning.

use std::cmp::Ordering;

use bap_core::{numerics, Col};
use tracing::debug;

use crate::pqueue::{Compare, PriorityQueue};

fn cmp_redcost(a: &Col, b: &Col) -> Ordering {
    a.redcost()
        .partial_cmp(&b.redcost())
        .unwrap_or(Ordering::Equal)
}

/// Oldest first.
fn cmp_age(a: &Col, b: &Col) -> Ordering {
    b.age().cmp(&a.age())
}

#[derive(Debug)]
pub struct ColPool {
    pqueue: PriorityQueue<Col>,
    age_limit: u32,
    max_soft: usize,
    max_hard: usize,
    node: Option<u64>,
}

impl ColPool {
    pub fn new(age_limit: u32, max_soft: usize, max_hard: usize) -> Self {
        debug_assert!(max_soft <= max_hard);
        ColPool {
            pqueue: PriorityQueue::new(cmp_redcost as Compare<Col>),
            age_limit,
            max_soft,
            max_hard,
            node: None,
        }
    }

    pub fn len(&self) -> usize {
        self.pqueue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pqueue.is_empty()
    }

    pub fn cols(&self) -> &[Col] {
        self.pqueue.items()
    }

    pub fn set_soft_limit(&mut self, max_soft: usize) {
        self.max_soft = max_soft;
    }

    /// Inserts a column unless the pool is at its hard cap or already
    /// holds a structurally equal column. Returns whether it was accepted;
    /// a rejected column is dropped.
    pub fn add_col(&mut self, mut col: Col) -> bool {
        if self.pqueue.len() >= self.max_hard {
            return false;
        }
        if self.pqueue.items().iter().any(|c| c.is_eq(&col)) {
            return false;
        }
        col.set_pos(None);
        self.pqueue.insert(col);
        true
    }

    pub fn peek_best(&self) -> Option<&Col> {
        self.pqueue.peek()
    }

    pub fn take_best(&mut self) -> Option<Col> {
        self.pqueue.pop()
    }

    /// Reduced cost of the best column, `+INFINITY` on an empty pool.
    pub fn best_redcost(&self) -> f64 {
        self.pqueue
            .peek()
            .map(Col::redcost)
            .unwrap_or(numerics::INFINITY)
    }

    /// Block of the best column, `None` on an empty pool.
    pub fn best_block(&self) -> Option<usize> {
        self.pqueue.peek().map(Col::block)
    }

    /// Evicts every column older than the age limit. The reduced-cost
    /// ordering is restored before returning.
    pub fn delete_old_columns(&mut self) {
        self.pqueue.set_comparator(cmp_age);
        self.pqueue.resort();

        let mut evicted = 0usize;
        while let Some(col) = self.pqueue.peek() {
            if col.age() > self.age_limit {
                self.pqueue.pop();
                evicted += 1;
            } else {
                break;
            }
        }
        if evicted > 0 {
            debug!(evicted, remaining = self.pqueue.len(), "colpool age sweep");
        }

        self.pqueue.set_comparator(cmp_redcost);
        self.pqueue.resort();
    }

    /// Evicts oldest columns until the soft cap is met; a soft cap of zero
    /// empties the pool. The reduced-cost ordering is restored before
    /// returning.
    pub fn delete_oldest_columns(&mut self) {
        if self.pqueue.len() <= self.max_soft {
            return;
        }
        if self.max_soft == 0 {
            self.delete_all_columns();
            return;
        }

        self.pqueue.set_comparator(cmp_age);
        self.pqueue.resort();

        while self.pqueue.len() > self.max_soft {
            self.pqueue.pop();
        }

        self.pqueue.set_comparator(cmp_redcost);
        self.pqueue.resort();
    }

    pub fn delete_all_columns(&mut self) {
        self.pqueue.clear();
    }

    /// Re-heaps after external reduced-cost updates.
    pub fn resort_columns(&mut self) {
        self.pqueue.resort();
    }

    /// Recomputes every pooled column's reduced cost with ageing and
    /// restores the ordering.
    pub fn update_redcosts(&mut self, mut redcost: impl FnMut(&Col) -> f64) {
        for col in self.pqueue.items_mut() {
            let rc = redcost(col);
            col.update_redcost(rc, true);
        }
        self.pqueue.resort();
    }

    /// Columns generated at another branch-and-bound node may be invalid
    /// under the new branching decisions; entering a different node wipes
    /// the pool.
    pub fn update_node(&mut self, node: u64) {
        match self.node {
            None => self.node = Some(node),
            Some(n) if n != node => {
                debug!(from = n, to = node, dropped = self.pqueue.len(), "colpool node change");
                self.delete_all_columns();
                self.node = Some(node);
            }
            _ => {}
        }
    }
}
