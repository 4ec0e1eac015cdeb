//! The toroidal cell grid.
//!
//! A [`Grid`] is an H×W matrix of cell bytes stored row by row. A cell is
//! alive when its byte equals [`ALIVE`] and dead when it equals [`DEAD`];
//! this matches the byte layout of the PGM images the grid is loaded from.
//! Adjacency wraps on both axes, but wrapping is the rule's concern -- the
//! grid itself only stores bytes.

use serde::{Deserialize, Serialize};

/// Byte value of a live cell.
pub const ALIVE: u8 = 255;

/// Byte value of a dead cell.
pub const DEAD: u8 = 0;

/// One row of cell bytes.
pub type Row = Vec<u8>;

/// Errors raised when a grid is built from malformed input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    /// The grid has a zero dimension.
    #[error("grid must be at least 1x1, got {width}x{height}")]
    Empty {
        /// Requested width.
        width: usize,
        /// Requested height.
        height: usize,
    },

    /// A row does not have the declared width.
    #[error("row {row} has width {actual}, expected {expected}")]
    RaggedRow {
        /// Index of the offending row.
        row: usize,
        /// Declared grid width.
        expected: usize,
        /// Actual length of the row.
        actual: usize,
    },

    /// The number of rows does not match the declared height.
    #[error("grid has {actual} rows, expected {expected}")]
    HeightMismatch {
        /// Declared grid height.
        expected: usize,
        /// Actual number of rows.
        actual: usize,
    },

    /// A coordinate lies outside the grid.
    #[error("cell ({x}, {y}) is outside a {width}x{height} grid")]
    OutOfBounds {
        /// Column.
        x: usize,
        /// Row.
        y: usize,
        /// Grid width.
        width: usize,
        /// Grid height.
        height: usize,
    },
}

/// Coordinates of a live cell: `x` is the column, `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Column index.
    pub x: usize,
    /// Row index.
    pub y: usize,
}

/// Wire shape of a grid before validation.
#[derive(Deserialize)]
struct RawGrid {
    width: usize,
    height: usize,
    rows: Vec<Row>,
}

impl TryFrom<RawGrid> for Grid {
    type Error = GridError;

    fn try_from(raw: RawGrid) -> Result<Self, Self::Error> {
        let grid = Self::from_rows(raw.rows)?;
        if grid.width != raw.width {
            return Err(GridError::RaggedRow {
                row: 0,
                expected: raw.width,
                actual: grid.width,
            });
        }
        if grid.height() != raw.height {
            return Err(GridError::HeightMismatch {
                expected: raw.height,
                actual: grid.height(),
            });
        }
        Ok(grid)
    }
}

/// A rectangular grid of cell bytes.
///
/// The shape is validated on construction and on deserialization, so every
/// `Grid` in the system is non-empty and rectangular.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct Grid {
    width: usize,
    height: usize,
    rows: Vec<Row>,
}

impl Grid {
    /// Create an all-dead grid.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Empty`] if either dimension is zero.
    pub fn new(width: usize, height: usize) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::Empty { width, height });
        }
        Ok(Self {
            width,
            height,
            rows: vec![vec![DEAD; width]; height],
        })
    }

    /// Build a grid from rows, checking that it is non-empty and rectangular.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Empty`] for no rows or zero-width rows, and
    /// [`GridError::RaggedRow`] when rows differ in length.
    pub fn from_rows(rows: Vec<Row>) -> Result<Self, GridError> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if width == 0 || height == 0 {
            return Err(GridError::Empty { width, height });
        }
        if let Some((row, bad)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(GridError::RaggedRow {
                row,
                expected: width,
                actual: bad.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rows,
        })
    }

    /// Build a grid of the given size with the listed cells alive.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Empty`] for a zero dimension and
    /// [`GridError::OutOfBounds`] for a cell outside the grid.
    pub fn with_alive(width: usize, height: usize, cells: &[Cell]) -> Result<Self, GridError> {
        let mut grid = Self::new(width, height)?;
        for cell in cells {
            grid.set(cell.x, cell.y, true)?;
        }
        Ok(grid)
    }

    /// Grid width in cells.
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Grid height in cells.
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Mutably borrow row `y`, if it exists.
    pub fn row_mut(&mut self, y: usize) -> Option<&mut Row> {
        self.rows.get_mut(y)
    }

    /// Borrow all rows, top to bottom.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Whether the cell at column `x`, row `y` is alive.
    ///
    /// Out-of-range coordinates read as dead.
    pub fn is_alive(&self, x: usize, y: usize) -> bool {
        self.rows
            .get(y)
            .and_then(|row| row.get(x))
            .is_some_and(|&b| b == ALIVE)
    }

    /// Set the cell at column `x`, row `y`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::OutOfBounds`] if the coordinate is outside the grid.
    pub fn set(&mut self, x: usize, y: usize, alive: bool) -> Result<(), GridError> {
        let (width, height) = (self.width, self.height);
        let cell = self
            .rows
            .get_mut(y)
            .and_then(|row| row.get_mut(x))
            .ok_or(GridError::OutOfBounds {
                x,
                y,
                width,
                height,
            })?;
        *cell = if alive { ALIVE } else { DEAD };
        Ok(())
    }

    /// Count live cells by scanning every byte.
    pub fn alive_count(&self) -> usize {
        count_alive(&self.rows)
    }

    /// List every live cell in row-major order.
    pub fn alive_cells(&self) -> Vec<Cell> {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(y, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, b)| **b == ALIVE)
                    .map(move |(x, _)| Cell { x, y })
            })
            .collect()
    }
}

/// Count live cells across a slice of rows.
pub fn count_alive(rows: &[Row]) -> usize {
    rows.iter()
        .map(|row| row.iter().filter(|&&b| b == ALIVE).count())
        .sum()
}
