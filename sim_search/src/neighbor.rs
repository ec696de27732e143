//! Bounded retention of the best neighbors seen for one query.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

/// One retained comparison. Ordered by similarity descending, then
/// reference index ascending, so "less" means "better".
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub ref_idx: usize,
    pub similarity: f64,
}

impl Neighbor {
    pub fn new(ref_idx: usize, similarity: f64) -> Self {
        return Self {
            ref_idx,
            similarity,
        };
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        return other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| self.ref_idx.cmp(&other.ref_idx));
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        return self.cmp(other) == Ordering::Equal;
    }
}

impl Eq for Neighbor {}

/// A neighbor as handed to the output collaborator, with the reference
/// identifier resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborRecord {
    pub similarity: f64,
    pub ref_idx: usize,
    pub ref_id: Option<String>,
}

/// Keeps the `capacity` best (similarity, reference index) pairs offered so
/// far, dropping everything below `min_similarity`.
///
/// Retention follows the full (similarity descending, index ascending)
/// order: a candidate offered to a full collector replaces the worst entry
/// exactly when it orders strictly better than it. The retained set is
/// therefore the true top-K under that order no matter how the offers were
/// interleaved, which matters because the matrix topology delivers offers
/// in scheduler order.
#[derive(Debug)]
pub struct NeighborSet {
    capacity: usize,
    min_similarity: f64,
    entries: BTreeSet<Neighbor>,
}

impl NeighborSet {
    pub fn new(capacity: usize, min_similarity: f64) -> Self {
        assert!(capacity >= 1, "capacity must be > 0");

        return Self {
            capacity,
            min_similarity,
            entries: BTreeSet::new(),
        };
    }

    /// Offers one comparison for retention. Returns whether it was kept.
    pub fn offer(&mut self, similarity: f64, ref_idx: usize) -> bool {
        if similarity < self.min_similarity {
            return false;
        }

        let candidate = Neighbor::new(ref_idx, similarity);

        if self.entries.len() < self.capacity {
            self.entries.insert(candidate);
            return true;
        }

        let evict = match self.entries.iter().next_back() {
            Some(worst) => candidate.cmp(worst) == Ordering::Less,
            None => false,
        };

        match evict {
            true => {
                let _ = self.entries.pop_last();
                self.entries.insert(candidate);
                return true;
            }
            false => {
                return false;
            }
        }
    }

    pub fn count(&self) -> usize {
        return self.entries.len();
    }

    pub fn capacity(&self) -> usize {
        return self.capacity;
    }

    pub fn min_similarity(&self) -> f64 {
        return self.min_similarity;
    }

    /// The lowest retained similarity, if anything is retained yet.
    pub fn worst_similarity(&self) -> Option<f64> {
        return self.entries.iter().next_back().map(|n| n.similarity);
    }

    /// Snapshot of the retained entries, best first (similarity descending,
    /// reference index ascending).
    pub fn results(&self) -> Vec<Neighbor> {
        return self.entries.iter().cloned().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdam::tqdm;
    use rand::seq::SliceRandom;
    use rand::Rng;

    fn brute_force_top_k(offers: &[(f64, usize)], capacity: usize, min_sim: f64) -> Vec<Neighbor> {
        let mut all: Vec<Neighbor> = offers
            .iter()
            .filter(|(sim, _)| *sim >= min_sim)
            .map(|(sim, idx)| Neighbor::new(*idx, *sim))
            .collect();
        all.sort();
        all.truncate(capacity);
        return all;
    }

    #[test]
    fn single_best_tracker() {
        let mut set = NeighborSet::new(1, 0.0);

        assert!(set.offer(0.4, 2));
        assert!(!set.offer(0.4, 5)); // same similarity, higher index loses
        assert!(set.offer(0.9, 7));
        assert!(!set.offer(0.9, 9));

        let results = set.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ref_idx, 7);
        assert_eq!(results[0].similarity, 0.9);
    }

    #[test]
    fn equal_similarity_prefers_lower_index() {
        let mut set = NeighborSet::new(1, 0.0);

        assert!(set.offer(0.4, 5));
        assert!(set.offer(0.4, 2)); // lower index wins the tie

        let results = set.results();
        assert_eq!(results[0].ref_idx, 2);
    }

    #[test]
    fn orders_by_similarity_then_index() {
        let mut set = NeighborSet::new(10, 0.0);
        set.offer(0.5, 3);
        set.offer(0.9, 8);
        set.offer(0.5, 1);
        set.offer(0.7, 0);

        let idxs: Vec<usize> = set.results().iter().map(|n| n.ref_idx).collect();
        assert_eq!(idxs, vec![8, 0, 1, 3]);
    }

    #[test]
    fn min_similarity_filters() {
        let mut set = NeighborSet::new(10, 0.5);

        assert!(!set.offer(0.49, 0));
        assert!(set.offer(0.5, 1));
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut set = NeighborSet::new(3, 0.0);
        for i in 0..100 {
            set.offer(i as f64 / 100.0, i);
        }

        assert_eq!(set.count(), 3);
        let idxs: Vec<usize> = set.results().iter().map(|n| n.ref_idx).collect();
        assert_eq!(idxs, vec![99, 98, 97]);
    }

    #[test]
    fn retained_set_is_offer_order_independent() {
        let mut rng = rand::thread_rng();

        for _ in tqdm!(0..2000) {
            let n = rng.gen_range(1..40);
            let capacity = rng.gen_range(1..10);
            // coarse similarity grid so ties are frequent
            let mut offers: Vec<(f64, usize)> = (0..n)
                .map(|i| (rng.gen_range(0..5) as f64 / 4.0, i))
                .collect();

            let expected = brute_force_top_k(&offers, capacity, 0.0);

            for _ in 0..4 {
                offers.shuffle(&mut rng);
                let mut set = NeighborSet::new(capacity, 0.0);
                for (sim, idx) in offers.iter() {
                    set.offer(*sim, *idx);
                }
                assert_eq!(set.results(), expected);
            }
        }
    }

    #[test]
    fn accumulates_everything_when_unbounded() {
        let mut set = NeighborSet::new(10_000, 0.0);
        for i in 0..500 {
            assert!(set.offer(0.25, i));
        }

        assert_eq!(set.count(), 500);
        assert_eq!(set.worst_similarity(), Some(0.25));
    }
}
