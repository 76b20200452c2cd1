//! Sparse pairwise score storage for correlation tables.
//!
//! Correlation between entities is sparse by nature: of all possible
//! src × dst pairs, only those anchored on observed edges ever score above
//! the significance threshold. Entries below the threshold are never stored,
//! so memory is bounded by observed structure, not by entity-count squared.

use std::collections::BTreeMap;

/// A sparse entity × entity score table. Rows are source entities, columns
/// are counterpart entities; only scores at or above the configured
/// threshold are kept. Backed by nested ordered maps so row lookup is O(1)-ish
/// and iteration order is deterministic.
#[derive(Debug, Clone)]
pub struct SparseScoreMatrix {
    rows: BTreeMap<String, BTreeMap<String, f64>>,
    threshold: f64,
    stored: usize,
}

impl SparseScoreMatrix {
    pub fn new(threshold: f64) -> Self {
        Self {
            rows: BTreeMap::new(),
            threshold,
            stored: 0,
        }
    }

    /// Insert a score for (row, col). Scores below the significance threshold
    /// are discarded. Returns whether the entry was stored.
    pub fn insert(&mut self, row: &str, col: &str, score: f64) -> bool {
        if score < self.threshold {
            return false;
        }
        let prev = self
            .rows
            .entry(row.to_string())
            .or_default()
            .insert(col.to_string(), score);
        if prev.is_none() {
            self.stored += 1;
        }
        true
    }

    /// Insert the same score in both directions. Used for first-order
    /// correlation, which is symmetric by construction.
    pub fn insert_symmetric(&mut self, a: &str, b: &str, score: f64) -> bool {
        let kept = self.insert(a, b, score);
        if kept {
            self.insert(b, a, score);
        }
        kept
    }

    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    /// All stored counterparts of `row`, in entity-name order.
    pub fn row(&self, row: &str) -> impl Iterator<Item = (&str, f64)> {
        self.rows
            .get(row)
            .into_iter()
            .flat_map(|r| r.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// Number of stored (row, col) entries. Symmetric pairs count twice.
    pub fn len(&self) -> usize {
        self.stored
    }

    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Flatten to (row, col, score) triples in deterministic order, for
    /// snapshotting.
    pub fn entries(&self) -> Vec<(String, String, f64)> {
        self.rows
            .iter()
            .flat_map(|(row, cols)| {
                cols.iter()
                    .map(move |(col, score)| (row.clone(), col.clone(), *score))
            })
            .collect()
    }

    /// Rebuild from snapshot triples. Entries below the threshold are
    /// re-filtered, so a threshold lowered between export and import never
    /// resurrects discarded pairs.
    pub fn from_entries(threshold: f64, entries: &[(String, String, f64)]) -> Self {
        let mut matrix = Self::new(threshold);
        for (row, col, score) in entries {
            matrix.insert(row, col, *score);
        }
        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_filters_insignificant_scores() {
        let mut m = SparseScoreMatrix::new(0.1);
        assert!(!m.insert("a", "b", 0.05));
        assert!(m.insert("a", "c", 0.42));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a", "b"), None);
        assert_eq!(m.get("a", "c"), Some(0.42));
    }

    #[test]
    fn test_symmetric_insert() {
        let mut m = SparseScoreMatrix::new(0.1);
        m.insert_symmetric("web-01", "web-02", 0.8);
        assert_eq!(m.get("web-01", "web-02"), m.get("web-02", "web-01"));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_row_iteration_ordered() {
        let mut m = SparseScoreMatrix::new(0.0);
        m.insert("a", "z", 0.3);
        m.insert("a", "b", 0.5);
        let cols: Vec<&str> = m.row("a").map(|(c, _)| c).collect();
        assert_eq!(cols, vec!["b", "z"]);
    }

    #[test]
    fn test_entries_round_trip() {
        let mut m = SparseScoreMatrix::new(0.1);
        m.insert("a", "b", 0.5);
        m.insert_symmetric("c", "d", 0.9);
        let rebuilt = SparseScoreMatrix::from_entries(0.1, &m.entries());
        assert_eq!(rebuilt.len(), m.len());
        assert_eq!(rebuilt.get("d", "c"), Some(0.9));
    }
}
