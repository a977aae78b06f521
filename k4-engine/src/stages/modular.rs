//! Square matrices over Z/26

use k4_common::text::ALPHABET_LEN;

const MODULUS: i64 = ALPHABET_LEN as i64;

/// Multiplicative inverse of `a` mod `m`, if gcd(a, m) == 1
pub fn mod_inverse(a: i64, m: i64) -> Option<i64> {
    let (mut old_r, mut r) = (a.rem_euclid(m), m);
    let (mut old_s, mut s) = (1i64, 0i64);
    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }
    (old_r == 1).then(|| old_s.rem_euclid(m))
}

/// Units mod 26 (values with an inverse)
pub fn units() -> impl Iterator<Item = u8> {
    (1..MODULUS as u8).filter(|&v| mod_inverse(v as i64, MODULUS).is_some())
}

/// n x n matrix with entries in 0..26, row-major
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModMatrix {
    n: usize,
    cells: Vec<i64>,
}

impl ModMatrix {
    pub fn identity(n: usize) -> Self {
        let mut cells = vec![0; n * n];
        for i in 0..n {
            cells[i * n + i] = 1;
        }
        Self { n, cells }
    }

    /// Build from rows; `None` unless the rows form a square matrix
    pub fn from_rows(rows: &[Vec<u8>]) -> Option<Self> {
        let n = rows.len();
        if n == 0 || rows.iter().any(|r| r.len() != n) {
            return None;
        }
        let cells = rows
            .iter()
            .flat_map(|r| r.iter().map(|&v| v as i64 % MODULUS))
            .collect();
        Some(Self { n, cells })
    }

    /// Build with each block as one column
    pub fn from_columns(columns: &[Vec<u8>]) -> Option<Self> {
        let n = columns.len();
        if n == 0 || columns.iter().any(|c| c.len() != n) {
            return None;
        }
        let mut cells = vec![0; n * n];
        for (c, column) in columns.iter().enumerate() {
            for (r, &v) in column.iter().enumerate() {
                cells[r * n + c] = v as i64 % MODULUS;
            }
        }
        Some(Self { n, cells })
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn get(&self, row: usize, col: usize) -> i64 {
        self.cells[row * self.n + col]
    }

    pub fn rows(&self) -> Vec<Vec<u8>> {
        self.cells
            .chunks(self.n)
            .map(|r| r.iter().map(|&v| v as u8).collect())
            .collect()
    }

    /// Place `block` on the diagonal at (`offset`, `offset`) of an identity-sized matrix
    ///
    /// Remaining diagonal entries are set to `diagonal`.
    pub fn embed(n: usize, block: &ModMatrix, offset: usize, diagonal: u8) -> Option<Self> {
        if offset + block.n > n {
            return None;
        }
        let mut cells = vec![0; n * n];
        for i in 0..n {
            cells[i * n + i] = diagonal as i64 % MODULUS;
        }
        for r in 0..block.n {
            for c in 0..block.n {
                cells[(offset + r) * n + offset + c] = block.get(r, c);
            }
        }
        Some(Self { n, cells })
    }

    /// Determinant mod 26 (Laplace expansion, small n only)
    pub fn determinant(&self) -> i64 {
        determinant_of(&self.cells, self.n).rem_euclid(MODULUS)
    }

    pub fn inverse(&self) -> Option<Self> {
        let det_inv = mod_inverse(self.determinant(), MODULUS)?;
        let n = self.n;
        if n == 1 {
            return Some(Self { n, cells: vec![det_inv] });
        }
        let mut cells = vec![0; n * n];
        for r in 0..n {
            for c in 0..n {
                // adjugate = transposed cofactor matrix
                let minor = determinant_of(&minor_cells(&self.cells, n, r, c), n - 1);
                let sign = if (r + c) % 2 == 0 { 1 } else { -1 };
                cells[c * n + r] = (sign * minor * det_inv).rem_euclid(MODULUS);
            }
        }
        Some(Self { n, cells })
    }

    pub fn mul(&self, other: &ModMatrix) -> Option<Self> {
        if self.n != other.n {
            return None;
        }
        let n = self.n;
        let mut cells = vec![0; n * n];
        for r in 0..n {
            for c in 0..n {
                let sum: i64 = (0..n).map(|k| self.get(r, k) * other.get(k, c)).sum();
                cells[r * n + c] = sum.rem_euclid(MODULUS);
            }
        }
        Some(Self { n, cells })
    }

    /// Multiply a column vector (one text block)
    pub fn apply(&self, block: &[u8]) -> Vec<u8> {
        (0..self.n)
            .map(|r| {
                let sum: i64 = (0..self.n).map(|c| self.get(r, c) * block[c] as i64).sum();
                sum.rem_euclid(MODULUS) as u8
            })
            .collect()
    }

    /// Transform text block by block from the start; a short tail is copied unchanged
    pub fn apply_text(&self, letters: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(letters.len());
        for chunk in letters.chunks(self.n) {
            if chunk.len() == self.n {
                out.extend(self.apply(chunk));
            } else {
                out.extend_from_slice(chunk);
            }
        }
        out
    }
}

fn minor_cells(cells: &[i64], n: usize, skip_row: usize, skip_col: usize) -> Vec<i64> {
    let mut out = Vec::with_capacity((n - 1) * (n - 1));
    for r in 0..n {
        if r == skip_row {
            continue;
        }
        for c in 0..n {
            if c != skip_col {
                out.push(cells[r * n + c]);
            }
        }
    }
    out
}

fn determinant_of(cells: &[i64], n: usize) -> i64 {
    match n {
        0 => 1,
        1 => cells[0],
        2 => cells[0] * cells[3] - cells[1] * cells[2],
        _ => (0..n)
            .map(|c| {
                let sign = if c % 2 == 0 { 1 } else { -1 };
                sign * cells[c] * determinant_of(&minor_cells(cells, n, 0, c), n - 1)
            })
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_inverse() {
        assert_eq!(mod_inverse(3, 26), Some(9));
        assert_eq!(mod_inverse(25, 26), Some(25));
        assert_eq!(mod_inverse(13, 26), None);
        assert_eq!(mod_inverse(2, 26), None);
        assert_eq!(units().count(), 12);
    }

    #[test]
    fn test_inverse_2x2() {
        let k = ModMatrix::from_rows(&[vec![3, 3], vec![2, 5]]).unwrap();
        assert_eq!(k.determinant(), 9);
        let inv = k.inverse().unwrap();
        assert_eq!(inv.rows(), vec![vec![15, 17], vec![20, 9]]);
        assert_eq!(k.mul(&inv).unwrap(), ModMatrix::identity(2));
    }

    #[test]
    fn test_inverse_3x3() {
        let k = ModMatrix::from_rows(&[vec![6, 24, 1], vec![13, 16, 10], vec![20, 17, 15]]).unwrap();
        let inv = k.inverse().unwrap();
        assert_eq!(inv.mul(&k).unwrap(), ModMatrix::identity(3));
    }

    #[test]
    fn test_singular_matrix_has_no_inverse() {
        let k = ModMatrix::from_rows(&[vec![2, 4], vec![1, 2]]).unwrap();
        assert!(k.inverse().is_none());
    }

    #[test]
    fn test_apply_text_copies_tail() {
        let k = ModMatrix::from_rows(&[vec![3, 3], vec![2, 5]]).unwrap();
        // HELP -> HIAT (classic example), trailing letter untouched
        let plain = vec![7, 4, 11, 15, 0];
        assert_eq!(k.apply_text(&plain), vec![7, 8, 0, 19, 0]);
    }

    #[test]
    fn test_embed_block() {
        let block = ModMatrix::from_rows(&[vec![3, 3], vec![2, 5]]).unwrap();
        let m = ModMatrix::embed(3, &block, 1, 7).unwrap();
        assert_eq!(m.rows(), vec![vec![7, 0, 0], vec![0, 3, 3], vec![0, 2, 5]]);
        assert!(ModMatrix::embed(3, &block, 2, 1).is_none());
    }
}
