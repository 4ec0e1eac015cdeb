//! Row bands and their placement in the canonical grid.
//!
//! A worker owns a contiguous range of grid rows (its interior) plus one
//! halo row above and one below. The halo rows belong to the ring
//! neighbours: the top halo is the last interior row of the predecessor
//! band and the bottom halo is the first interior row of the successor
//! band, both wrapping around the torus.

use serde::{Deserialize, Serialize};

use crate::grid::{GridError, Row};

/// Which halo edge of a band a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// The halo row above the interior (owned by the predecessor).
    Top,
    /// The halo row below the interior (owned by the successor).
    Bottom,
}

impl Edge {
    /// Lowercase name used in logs and URLs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
        }
    }
}

/// Placement of a band inside the canonical grid: rows `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandSpec {
    /// Position of this band in the ring (0 is the topmost band).
    pub index: usize,
    /// First interior row (inclusive).
    pub start: usize,
    /// One past the last interior row.
    pub end: usize,
}

impl BandSpec {
    /// Number of interior rows.
    pub const fn height(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// A band of rows together with its two halo rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    /// Halo row above the interior.
    pub top: Row,
    /// Interior rows, top to bottom.
    pub interior: Vec<Row>,
    /// Halo row below the interior.
    pub bottom: Row,
}

impl Band {
    /// Number of interior rows.
    pub fn height(&self) -> usize {
        self.interior.len()
    }

    /// Width of the band (length of the top halo).
    pub fn width(&self) -> usize {
        self.top.len()
    }

    /// Check that the band is non-empty and every row has `width` cells.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Empty`] for a band without interior rows and
    /// [`GridError::RaggedRow`] for a row of the wrong width. Row indices in
    /// the error count the top halo as row 0.
    pub fn validate(&self, width: usize) -> Result<(), GridError> {
        if self.interior.is_empty() || width == 0 {
            return Err(GridError::Empty {
                width,
                height: self.interior.len(),
            });
        }
        let rows = std::iter::once(&self.top)
            .chain(self.interior.iter())
            .chain(std::iter::once(&self.bottom));
        for (row, r) in rows.enumerate() {
            if r.len() != width {
                return Err(GridError::RaggedRow {
                    row,
                    expected: width,
                    actual: r.len(),
                });
            }
        }
        Ok(())
    }
}
