use nalgebra::{Matrix3, Vector3};

/// A sparse symmetric matrix of 3x3 blocks over point indices.
///
/// Only the diagonal and the strict lower triangle are stored; the
/// symmetric counterpart of every off-diagonal block is applied implicitly
/// during multiplication. Interactions accumulate local blocks with
/// `add_block`; the matrix is never densified.
#[derive(Debug, Clone, Default)]
pub struct BlockSparseSym {
    n: usize,
    diagonal: Vec<Matrix3<f64>>,
    /// Per row `i`, the blocks `(j, B_ij)` with `j < i`.
    lower: Vec<Vec<(usize, Matrix3<f64>)>>,
}

impl BlockSparseSym {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            diagonal: vec![Matrix3::zeros(); n],
            lower: vec![Vec::new(); n],
        }
    }

    /// Resizes and zeroes the matrix, keeping allocations where possible.
    pub fn reset(&mut self, n: usize) {
        self.n = n;
        self.diagonal.clear();
        self.diagonal.resize(n, Matrix3::zeros());
        for row in &mut self.lower {
            row.clear();
        }
        self.lower.resize(n, Vec::new());
    }

    pub fn size(&self) -> usize {
        self.n
    }

    /// Accumulates `block` at `(i, j)`. Off-diagonal blocks are mirrored
    /// implicitly: callers add each unordered pair once.
    pub fn add_block(&mut self, i: usize, j: usize, block: &Matrix3<f64>) {
        debug_assert!(i < self.n && j < self.n);
        if i == j {
            self.diagonal[i] += block;
            return;
        }
        // store in the lower triangle as B_{row,col} with row > col
        let (row, col, block) = if i > j {
            (i, j, *block)
        } else {
            (j, i, block.transpose())
        };
        if let Some((_, existing)) = self.lower[row].iter_mut().find(|(c, _)| *c == col) {
            *existing += block;
        } else {
            self.lower[row].push((col, block));
        }
    }

    /// Accumulates `weight * I` at `(i, j)`.
    pub fn add_scalar(&mut self, i: usize, j: usize, weight: f64) {
        self.add_block(i, j, &(Matrix3::identity() * weight));
    }

    pub fn diagonal_block(&self, i: usize) -> &Matrix3<f64> {
        &self.diagonal[i]
    }

    /// `y += M x`, exploiting symmetry.
    pub fn multiply_add(&self, x: &[Vector3<f64>], y: &mut [Vector3<f64>]) {
        debug_assert_eq!(x.len(), self.n);
        debug_assert_eq!(y.len(), self.n);
        for i in 0..self.n {
            y[i] += self.diagonal[i] * x[i];
            for (j, block) in &self.lower[i] {
                y[i] += block * x[*j];
                y[*j] += block.transpose() * x[i];
            }
        }
    }

    /// `y = M x`.
    pub fn multiply(&self, x: &[Vector3<f64>], y: &mut [Vector3<f64>]) {
        for v in y.iter_mut() {
            *v = Vector3::zeros();
        }
        self.multiply_add(x, y);
    }

    /// Number of stored off-diagonal blocks.
    pub fn n_blocks(&self) -> usize {
        self.lower.iter().map(|row| row.len()).sum()
    }
}
