//! A dense row-major grid.

pub struct Grid {
    rows: Vec<Vec<i64>>,
}

impl Grid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows: vec![vec![0; cols]; rows],
        }
    }

    pub fn row(&self, index: usize) -> Option<&[i64]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Returns mutable references to two distinct rows at once, or
    /// `None` when either index is out of range or the indices are
    /// equal.
    pub fn row_pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut [i64], &mut [i64])> {
        // The naive version borrows self.rows mutably twice and does
        // not compile.
        let _ = (a, b);
        unimplemented!("hand out two disjoint mutable rows")
    }
}
