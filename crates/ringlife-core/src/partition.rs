//! Splitting the canonical grid into row bands and merging them back.
//!
//! For `n` bands over a grid of height `h`, band `i` covers rows
//! `[round(h*i/n), round(h*(i+1)/n))`, rounding halves up. Boundaries are
//! computed per index rather than by accumulating heights, so the bands
//! always tile the grid exactly and differ in height by at most one row.
//!
//! Each band is cut with one halo row above and one below, taken from the
//! neighbouring bands and wrapping around the torus. Merging only copies
//! interior rows; halos are never written back.

use ringlife_types::{Band, BandSpec, Grid, Row};

/// Errors raised while partitioning or merging.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    /// A partition needs at least one band and one row.
    #[error("cannot split {height} rows into {bands} bands")]
    Degenerate {
        /// Requested band count.
        bands: usize,
        /// Grid height.
        height: usize,
    },

    /// The grid does not have the height the partition was built for.
    #[error("partition built for height {expected}, grid has height {actual}")]
    GridHeight {
        /// Height the partition covers.
        expected: usize,
        /// Height of the grid passed in.
        actual: usize,
    },

    /// A merged band returned the wrong number of interior rows.
    #[error("band {index} returned {actual} rows, expected {expected}")]
    BandHeight {
        /// Ring index of the band.
        index: usize,
        /// Interior height of the band.
        expected: usize,
        /// Rows actually returned.
        actual: usize,
    },

    /// A merged band returned a row of the wrong width.
    #[error("band {index} returned a row of width {actual}, expected {expected}")]
    BandWidth {
        /// Ring index of the band.
        index: usize,
        /// Grid width.
        expected: usize,
        /// Width of the offending row.
        actual: usize,
    },
}

/// A fixed division of a grid height into contiguous bands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    height: usize,
    bands: Vec<BandSpec>,
}

impl Partition {
    /// Divide `height` rows into `count` bands.
    ///
    /// `count` is clamped to `height` so that no band is empty.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::Degenerate`] when `count` or `height` is zero.
    pub fn new(height: usize, count: usize) -> Result<Self, PartitionError> {
        if count == 0 || height == 0 {
            return Err(PartitionError::Degenerate {
                bands: count,
                height,
            });
        }
        let count = count.min(height);
        let bands = (0..count)
            .map(|index| BandSpec {
                index,
                start: boundary(height, count, index),
                end: boundary(height, count, index.saturating_add(1)),
            })
            .collect();
        Ok(Self { height, bands })
    }

    /// Grid height this partition covers.
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Number of bands.
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    /// Whether the partition has no bands (never true once constructed).
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// The band placements, in ring order.
    pub fn bands(&self) -> &[BandSpec] {
        &self.bands
    }

    /// Cut one band (interior plus wrapped halos) out of `grid`.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::GridHeight`] if `grid` has a different height.
    pub fn cut_band(&self, grid: &Grid, spec: &BandSpec) -> Result<Band, PartitionError> {
        self.check_height(grid)?;
        let rows = grid.rows();
        let above = spec
            .start
            .checked_sub(1)
            .unwrap_or_else(|| self.height.saturating_sub(1));
        let below = if spec.end >= self.height { 0 } else { spec.end };
        Ok(Band {
            top: rows.get(above).cloned().unwrap_or_default(),
            interior: rows.get(spec.start..spec.end).map(<[Row]>::to_vec).unwrap_or_default(),
            bottom: rows.get(below).cloned().unwrap_or_default(),
        })
    }

    /// Cut every band out of `grid`, in ring order.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::GridHeight`] if `grid` has a different height.
    pub fn cut(&self, grid: &Grid) -> Result<Vec<Band>, PartitionError> {
        self.bands.iter().map(|spec| self.cut_band(grid, spec)).collect()
    }

    /// Write a band's interior rows back into `grid` at the band's offset.
    ///
    /// The rows are checked before anything is written, so a malformed
    /// result leaves the grid untouched.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::BandHeight`] or [`PartitionError::BandWidth`]
    /// for a malformed interior, and [`PartitionError::GridHeight`] if `grid`
    /// has a different height.
    pub fn merge(
        &self,
        grid: &mut Grid,
        spec: &BandSpec,
        interior: Vec<Row>,
    ) -> Result<(), PartitionError> {
        self.check_height(grid)?;
        check_interior(spec, grid.width(), &interior)?;
        for (offset, row) in interior.into_iter().enumerate() {
            if let Some(dst) = grid.row_mut(spec.start.saturating_add(offset)) {
                *dst = row;
            }
        }
        Ok(())
    }

    fn check_height(&self, grid: &Grid) -> Result<(), PartitionError> {
        if grid.height() == self.height {
            Ok(())
        } else {
            Err(PartitionError::GridHeight {
                expected: self.height,
                actual: grid.height(),
            })
        }
    }
}

/// Check that `interior` has the shape of `spec` at the given width.
///
/// # Errors
///
/// Returns [`PartitionError::BandHeight`] or [`PartitionError::BandWidth`].
pub fn check_interior(spec: &BandSpec, width: usize, interior: &[Row]) -> Result<(), PartitionError> {
    if interior.len() != spec.height() {
        return Err(PartitionError::BandHeight {
            index: spec.index,
            expected: spec.height(),
            actual: interior.len(),
        });
    }
    if let Some(bad) = interior.iter().find(|r| r.len() != width) {
        return Err(PartitionError::BandWidth {
            index: spec.index,
            expected: width,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Ring neighbours of band `index` among `count` bands: `(predecessor, successor)`.
///
/// With a single band the band is its own predecessor and successor.
pub const fn ring_neighbours(index: usize, count: usize) -> (usize, usize) {
    if count <= 1 {
        return (0, 0);
    }
    let predecessor = if index == 0 {
        count.saturating_sub(1)
    } else {
        index.saturating_sub(1)
    };
    let successor = if index.saturating_add(1) >= count {
        0
    } else {
        index.saturating_add(1)
    };
    (predecessor, successor)
}

/// Row boundary `round(height * index / count)`, halves rounded up.
#[allow(clippy::arithmetic_side_effects, clippy::integer_division)]
const fn boundary(height: usize, count: usize, index: usize) -> usize {
    // count > 0 is guaranteed by `Partition::new`; the products stay far
    // below usize::MAX for any grid that fits in memory.
    (2 * height * index + count) / (2 * count)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use ringlife_types::{ALIVE, DEAD};

    use super::*;
    use crate::rule::{step_band, step_grid};

    fn striped_grid(width: usize, height: usize) -> Grid {
        let rows = (0..height)
            .map(|y| (0..width).map(|x| if (x + y) % 3 == 0 { ALIVE } else { DEAD }).collect())
            .collect();
        Grid::from_rows(rows).unwrap()
    }

    fn heights(p: &Partition) -> Vec<usize> {
        p.bands().iter().map(BandSpec::height).collect()
    }

    #[test]
    fn bands_tile_the_grid() {
        for height in [1, 2, 7, 16, 64, 100] {
            for count in 1..=9 {
                let p = Partition::new(height, count).unwrap();
                let bands = p.bands();
                assert_eq!(bands.first().unwrap().start, 0);
                assert_eq!(bands.last().unwrap().end, height);
                for pair in bands.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
                assert!(bands.iter().all(|b| b.height() > 0));
                let hs = heights(&p);
                let spread = hs.iter().max().unwrap() - hs.iter().min().unwrap();
                assert!(spread <= 1, "height {height} count {count}: {hs:?}");
            }
        }
    }

    #[test]
    fn boundaries_round_to_nearest_row() {
        // 16 / 3 = 5.33: boundaries 0, round(5.33)=5, round(10.67)=11, 16.
        let p = Partition::new(16, 3).unwrap();
        assert_eq!(heights(&p), vec![5, 6, 5]);
        // 10 / 4 = 2.5: boundaries 0, round(2.5)=3, 5, round(7.5)=8, 10.
        let p = Partition::new(10, 4).unwrap();
        assert_eq!(heights(&p), vec![3, 2, 3, 2]);
    }

    #[test]
    fn more_bands_than_rows_is_clamped() {
        let p = Partition::new(3, 8).unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(heights(&p), vec![1, 1, 1]);
    }

    #[test]
    fn zero_bands_is_rejected() {
        assert_eq!(
            Partition::new(16, 0),
            Err(PartitionError::Degenerate {
                bands: 0,
                height: 16
            })
        );
    }

    #[test]
    fn halos_wrap_around_the_torus() {
        let grid = striped_grid(5, 6);
        let p = Partition::new(6, 2).unwrap();
        let bands = p.cut(&grid).unwrap();
        assert_eq!(bands[0].top, grid.rows()[5]);
        assert_eq!(bands[0].bottom, grid.rows()[3]);
        assert_eq!(bands[1].top, grid.rows()[2]);
        assert_eq!(bands[1].bottom, grid.rows()[0]);
    }

    #[test]
    fn single_band_halos_are_own_edges() {
        let grid = striped_grid(4, 4);
        let p = Partition::new(4, 1).unwrap();
        let band = p.cut_band(&grid, &p.bands()[0]).unwrap();
        assert_eq!(band.top, grid.rows()[3]);
        assert_eq!(band.bottom, grid.rows()[0]);
        assert_eq!(band.interior, grid.rows().to_vec());
    }

    #[test]
    fn stepping_bands_and_merging_equals_stepping_the_grid() {
        let grid = striped_grid(9, 11);
        let expected = step_grid(&grid);
        for count in 1..=5 {
            let p = Partition::new(11, count).unwrap();
            let mut merged = grid.clone();
            for (spec, band) in p.bands().iter().zip(p.cut(&grid).unwrap()) {
                p.merge(&mut merged, spec, step_band(&band)).unwrap();
            }
            assert_eq!(merged, expected, "count {count}");
        }
    }

    #[test]
    fn merge_rejects_malformed_interior_without_writing() {
        let mut grid = striped_grid(4, 4);
        let before = grid.clone();
        let p = Partition::new(4, 2).unwrap();
        let spec = p.bands()[1];
        let err = p.merge(&mut grid, &spec, vec![vec![ALIVE; 4]]).unwrap_err();
        assert!(matches!(err, PartitionError::BandHeight { index: 1, .. }));
        let err = p
            .merge(&mut grid, &spec, vec![vec![ALIVE; 4], vec![ALIVE; 3]])
            .unwrap_err();
        assert!(matches!(err, PartitionError::BandWidth { index: 1, .. }));
        assert_eq!(grid, before);
    }

    #[test]
    fn ring_neighbours_wrap() {
        assert_eq!(ring_neighbours(0, 1), (0, 0));
        assert_eq!(ring_neighbours(0, 4), (3, 1));
        assert_eq!(ring_neighbours(3, 4), (2, 0));
        assert_eq!(ring_neighbours(1, 2), (0, 0));
    }
}
