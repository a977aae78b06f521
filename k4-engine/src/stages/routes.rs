//! Columnar grid geometry and reading routes
//!
//! A text of `len` letters fills a grid `period` columns wide, row by row;
//! the last row may be short. Cells are addressed by row-major index
//! `row * period + col` and only indices below `len` exist.

use crate::types::Route;

/// Geometry of an irregular columnar grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub len: usize,
    pub period: usize,
}

impl Grid {
    pub fn new(len: usize, period: usize) -> Self {
        Self { len, period }
    }

    pub fn rows(&self) -> usize {
        self.len.div_ceil(self.period)
    }

    /// Letters in column `col` (long columns first)
    pub fn column_len(&self, col: usize) -> usize {
        let full = self.len / self.period;
        if col < self.len % self.period {
            full + 1
        } else {
            full
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        col < self.period && row * self.period + col < self.len
    }

    /// Start offset of each column's block in the ciphertext, indexed by column
    pub fn column_starts(&self, order: &[usize]) -> Vec<usize> {
        let mut starts = vec![0; self.period];
        let mut offset = 0;
        for &col in order {
            starts[col] = offset;
            offset += self.column_len(col);
        }
        starts
    }

    /// Cell indices in the order `route` reads them
    pub fn route_cells(&self, route: Route) -> Vec<usize> {
        let rows = self.rows();
        let cols = self.period;
        let coords: Vec<(usize, usize)> = match route {
            Route::Rows => (0..rows)
                .flat_map(|r| (0..cols).map(move |c| (r, c)))
                .collect(),
            Route::Boustrophedon => (0..rows)
                .flat_map(|r| {
                    let cells: Vec<(usize, usize)> = if r % 2 == 0 {
                        (0..cols).map(|c| (r, c)).collect()
                    } else {
                        (0..cols).rev().map(|c| (r, c)).collect()
                    };
                    cells
                })
                .collect(),
            Route::Spiral => spiral(rows, cols, true),
            Route::PerimeterIn => spiral(rows, cols, false),
            Route::PerimeterOut => {
                let mut cells = spiral(rows, cols, false);
                cells.reverse();
                cells
            }
        };
        coords
            .into_iter()
            .filter(|&(r, c)| self.contains(r, c))
            .map(|(r, c)| r * cols + c)
            .collect()
    }

    /// Undo a columnar transposition read out in `order`, then read by `route`
    pub fn decrypt(&self, cipher: &[u8], order: &[usize], route: Route) -> Vec<u8> {
        let starts = self.column_starts(order);
        let mut cells = vec![0u8; self.len];
        for col in 0..self.period {
            for row in 0..self.column_len(col) {
                cells[row * self.period + col] = cipher[starts[col] + row];
            }
        }
        self.route_cells(route).iter().map(|&cell| cells[cell]).collect()
    }

    /// Write `plain` along `route`, read columns in `order`
    pub fn encrypt(&self, plain: &[u8], order: &[usize], route: Route) -> Vec<u8> {
        let mut cells = vec![0u8; self.len];
        for (&cell, &letter) in self.route_cells(route).iter().zip(plain) {
            cells[cell] = letter;
        }
        let mut out = Vec::with_capacity(self.len);
        for &col in order {
            for row in 0..self.column_len(col) {
                out.push(cells[row * self.period + col]);
            }
        }
        out
    }
}

/// Spiral walk over a full `rows` x `cols` rectangle from the top-left
///
/// Clockwise goes right first; counter-clockwise goes down first.
fn spiral(rows: usize, cols: usize, clockwise: bool) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(rows * cols);
    if rows == 0 || cols == 0 {
        return out;
    }
    let (mut top, mut bottom, mut left, mut right) = (0i64, rows as i64 - 1, 0i64, cols as i64 - 1);
    let mut push = |r: i64, c: i64| out.push((r as usize, c as usize));

    while top <= bottom && left <= right {
        if clockwise {
            for c in left..=right {
                push(top, c);
            }
            for r in top + 1..=bottom {
                push(r, right);
            }
            if top < bottom {
                for c in (left..right).rev() {
                    push(bottom, c);
                }
            }
            if left < right {
                for r in (top + 1..bottom).rev() {
                    push(r, left);
                }
            }
        } else {
            for r in top..=bottom {
                push(r, left);
            }
            for c in left + 1..=right {
                push(bottom, c);
            }
            if left < right {
                for r in (top..bottom).rev() {
                    push(r, right);
                }
            }
            if top < bottom {
                for c in (left + 1..right).rev() {
                    push(top, c);
                }
            }
        }
        top += 1;
        bottom -= 1;
        left += 1;
        right -= 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k4_common::text::{from_indices, to_indices};

    #[test]
    fn test_irregular_column_lengths() {
        let grid = Grid::new(12, 5);
        let lens: Vec<usize> = (0..5).map(|c| grid.column_len(c)).collect();
        assert_eq!(lens, vec![3, 3, 2, 2, 2]);
        assert_eq!(grid.rows(), 3);
    }

    #[test]
    fn test_columnar_round_trip_all_routes() {
        let plain = to_indices("WEAREDISCOVEREDFLEEATONCE");
        let grid = Grid::new(plain.len(), 6);
        let order = [2, 0, 5, 3, 1, 4];
        for route in [
            Route::Rows,
            Route::Boustrophedon,
            Route::Spiral,
            Route::PerimeterIn,
            Route::PerimeterOut,
        ] {
            let cipher = grid.encrypt(&plain, &order, route);
            assert_eq!(grid.decrypt(&cipher, &order, route), plain, "{:?}", route);
        }
    }

    #[test]
    fn test_known_columnar_encryption() {
        // Columns read in order 1,0,2: "HELLOWORLD" in 3 columns
        // H E L / L O W / O R L / D
        let grid = Grid::new(10, 3);
        let cipher = grid.encrypt(&to_indices("HELLOWORLD"), &[1, 0, 2], Route::Rows);
        assert_eq!(from_indices(&cipher), "EORHLODLWL");
    }

    #[test]
    fn test_routes_visit_every_cell_once() {
        let grid = Grid::new(23, 5);
        for route in [Route::Spiral, Route::PerimeterIn, Route::Boustrophedon] {
            let mut cells = grid.route_cells(route);
            assert_eq!(cells.len(), 23);
            cells.sort_unstable();
            assert_eq!(cells, (0..23).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_spiral_order() {
        let grid = Grid::new(9, 3);
        assert_eq!(grid.route_cells(Route::Spiral), vec![0, 1, 2, 5, 8, 7, 6, 3, 4]);
        assert_eq!(grid.route_cells(Route::PerimeterIn), vec![0, 3, 6, 7, 8, 5, 2, 1, 4]);
    }
}
