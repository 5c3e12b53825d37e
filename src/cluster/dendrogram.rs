//! Merge tree produced by agglomerative clustering.
//!
//! Leaves are numbered `0..n`; merge `i` creates node `n + i`
//! (SciPy/MATLAB convention, which is also what kodama emits).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A dendrogram representing hierarchical cluster merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    merges: Vec<Merge>,
    n_items: usize,
}

/// A single merge operation in the dendrogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    /// First node being merged.
    pub cluster_a: usize,
    /// Second node being merged.
    pub cluster_b: usize,
    /// Linkage distance at which the merge occurred.
    pub distance: f64,
    /// Number of leaves under the new node.
    pub size: usize,
}

impl Dendrogram {
    /// Create an empty dendrogram over `n_items` leaves.
    pub fn new(n_items: usize) -> Self {
        Self {
            merges: Vec::with_capacity(n_items.saturating_sub(1)),
            n_items,
        }
    }

    /// Record a merge operation.
    pub fn add_merge(&mut self, cluster_a: usize, cluster_b: usize, distance: f64, size: usize) {
        self.merges.push(Merge {
            cluster_a,
            cluster_b,
            distance,
            size,
        });
    }

    /// Labels after replaying the first `n_merges` merges.
    ///
    /// Labels are consecutive, numbered by first appearance.
    fn replay(&self, n_merges: usize) -> Vec<usize> {
        let total = self.n_items + self.merges.len();
        let mut parent: Vec<usize> = (0..total).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for (i, merge) in self.merges.iter().take(n_merges).enumerate() {
            let node = self.n_items + i;
            let a = find(&mut parent, merge.cluster_a);
            let b = find(&mut parent, merge.cluster_b);
            parent[a] = node;
            parent[b] = node;
        }

        let mut roots: Vec<usize> = Vec::new();
        (0..self.n_items)
            .map(|leaf| {
                let root = find(&mut parent, leaf);
                match roots.iter().position(|&r| r == root) {
                    Some(label) => label,
                    None => {
                        roots.push(root);
                        roots.len() - 1
                    }
                }
            })
            .collect()
    }

    /// Cluster assignments for exactly `k` clusters.
    ///
    /// Replays the first `n - k` merges, so ties in merge distance never
    /// produce more or fewer than `k` groups.
    pub fn cut_to_k(&self, k: usize) -> Result<Vec<usize>> {
        if k == 0 || k > self.n_items {
            return Err(Error::InvalidClusterCount {
                requested: k,
                n_items: self.n_items,
            });
        }
        let n_merges = self.n_items - k;
        if n_merges > self.merges.len() {
            return Err(Error::invalid_parameter(
                "k",
                format!("dendrogram has only {} merges", self.merges.len()),
            ));
        }
        Ok(self.replay(n_merges))
    }

    /// Cluster assignments keeping only merges at distance <= `threshold`.
    ///
    /// Merge distances are non-decreasing for the supported linkages.
    pub fn cut_at_distance(&self, threshold: f64) -> Vec<usize> {
        let n_merges = self
            .merges
            .iter()
            .take_while(|m| m.distance <= threshold)
            .count();
        self.replay(n_merges)
    }

    /// Number of original items.
    pub fn n_items(&self) -> usize {
        self.n_items
    }

    /// Number of merges recorded.
    pub fn n_merges(&self) -> usize {
        self.merges.len()
    }

    /// Iterate over merges.
    pub fn merges(&self) -> impl Iterator<Item = &Merge> {
        self.merges.iter()
    }

    /// Merge distances, in merge order.
    pub fn distances(&self) -> Vec<f64> {
        self.merges.iter().map(|m| m.distance).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_leaves() -> Dendrogram {
        // ((0,1) at 0.5), ((2,3) at 0.7), (4,5) at 3.0
        let mut dendro = Dendrogram::new(4);
        dendro.add_merge(0, 1, 0.5, 2);
        dendro.add_merge(2, 3, 0.7, 2);
        dendro.add_merge(4, 5, 3.0, 4);
        dendro
    }

    #[test]
    fn test_dendrogram_creation() {
        let dendro = Dendrogram::new(5);
        assert_eq!(dendro.n_items(), 5);
        assert_eq!(dendro.n_merges(), 0);
    }

    #[test]
    fn test_cut_to_k() {
        let dendro = four_leaves();
        assert_eq!(dendro.cut_to_k(4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(dendro.cut_to_k(3).unwrap(), vec![0, 0, 1, 2]);
        assert_eq!(dendro.cut_to_k(2).unwrap(), vec![0, 0, 1, 1]);
        assert_eq!(dendro.cut_to_k(1).unwrap(), vec![0, 0, 0, 0]);
        assert!(dendro.cut_to_k(0).is_err());
        assert!(dendro.cut_to_k(5).is_err());
    }

    #[test]
    fn test_cut_at_distance() {
        let dendro = four_leaves();
        assert_eq!(dendro.cut_at_distance(0.1), vec![0, 1, 2, 3]);
        assert_eq!(dendro.cut_at_distance(1.0), vec![0, 0, 1, 1]);
        assert_eq!(dendro.cut_at_distance(f64::MAX), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_cut_to_k_with_tied_distances() {
        let mut dendro = Dendrogram::new(4);
        dendro.add_merge(0, 1, 1.0, 2);
        dendro.add_merge(2, 3, 1.0, 2);
        dendro.add_merge(4, 5, 1.0, 4);
        assert_eq!(dendro.cut_to_k(3).unwrap(), vec![0, 0, 1, 2]);
    }
}
