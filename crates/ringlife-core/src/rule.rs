//! The Game of Life rule on a torus.
//!
//! A live cell with two or three live neighbours survives, a dead cell with
//! exactly three is born, every other cell dies. Neighbourhoods are the
//! eight surrounding cells with wrap-around on both axes.
//!
//! Workers never see the whole grid. They step a [`Band`]: the width axis
//! wraps inside the band, while the height axis is supplied entirely by the
//! two halo rows. Stepping the whole grid is the one-band special case in
//! which the halos are the grid's own last and first rows.

use ringlife_types::{ALIVE, Band, DEAD, Grid, Row};

/// Next state of a cell given its current byte and live neighbour count.
///
/// With exactly two neighbours the cell keeps its current byte unchanged.
pub const fn next_cell(current: u8, live_neighbours: u8) -> u8 {
    match live_neighbours {
        3 => ALIVE,
        2 => current,
        _ => DEAD,
    }
}

/// Step one row given the rows directly above and below it.
///
/// All three rows must have the same width; missing cells read as dead.
pub fn step_row(above: &[u8], row: &[u8], below: &[u8], width: usize) -> Row {
    let alive = |r: &[u8], x: usize| u8::from(r.get(x).is_some_and(|&b| b == ALIVE));
    (0..width)
        .map(|x| {
            let left = x.checked_sub(1).unwrap_or_else(|| width.saturating_sub(1));
            let right = if x.saturating_add(1) >= width {
                0
            } else {
                x.saturating_add(1)
            };
            let neighbours = [
                alive(above, left),
                alive(above, x),
                alive(above, right),
                alive(row, left),
                alive(row, right),
                alive(below, left),
                alive(below, x),
                alive(below, right),
            ]
            .iter()
            .fold(0_u8, |acc, n| acc.saturating_add(*n));
            next_cell(row.get(x).copied().unwrap_or(DEAD), neighbours)
        })
        .collect()
}

/// Step the interior of a band one generation.
///
/// Returns the next interior rows; the halos are only read.
pub fn step_band(band: &Band) -> Vec<Row> {
    let width = band.width();
    let view: Vec<&Row> = std::iter::once(&band.top)
        .chain(band.interior.iter())
        .chain(std::iter::once(&band.bottom))
        .collect();
    view.windows(3)
        .filter_map(|w| match w {
            [above, row, below] => Some(step_row(above, row, below, width)),
            _ => None,
        })
        .collect()
}

/// The whole grid as a single band whose halos wrap around the torus.
pub fn whole_grid_band(grid: &Grid) -> Band {
    let rows = grid.rows();
    Band {
        top: rows.last().cloned().unwrap_or_default(),
        interior: rows.to_vec(),
        bottom: rows.first().cloned().unwrap_or_default(),
    }
}

/// Step the whole grid one generation.
pub fn step_grid(grid: &Grid) -> Grid {
    let mut next = grid.clone();
    for (y, row) in step_band(&whole_grid_band(grid)).into_iter().enumerate() {
        if let Some(dst) = next.row_mut(y) {
            *dst = row;
        }
    }
    next
}

/// Step the whole grid `turns` generations in-process.
///
/// This is the serial reference every distributed run must match, and the
/// broker's fallback when no workers are alive.
pub fn advance(grid: &Grid, turns: u64) -> Grid {
    let mut current = grid.clone();
    for _ in 0..turns {
        current = step_grid(&current);
    }
    current
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use ringlife_types::Cell;

    use super::*;

    fn random_grid(width: usize, height: usize, seed: u64) -> Grid {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows = (0..height)
            .map(|_| {
                (0..width)
                    .map(|_| if rng.random_bool(0.35) { ALIVE } else { DEAD })
                    .collect()
            })
            .collect();
        Grid::from_rows(rows).unwrap()
    }

    fn rotate_180(grid: &Grid) -> Grid {
        let rows = grid
            .rows()
            .iter()
            .rev()
            .map(|r| r.iter().rev().copied().collect())
            .collect();
        Grid::from_rows(rows).unwrap()
    }

    fn cells(list: &[(usize, usize)]) -> Vec<Cell> {
        let mut v: Vec<Cell> = list.iter().map(|&(x, y)| Cell { x, y }).collect();
        v.sort_by_key(|c| (c.y, c.x));
        v
    }

    #[test]
    fn next_cell_follows_b3_s23() {
        assert_eq!(next_cell(DEAD, 3), ALIVE);
        assert_eq!(next_cell(ALIVE, 3), ALIVE);
        assert_eq!(next_cell(ALIVE, 2), ALIVE);
        assert_eq!(next_cell(DEAD, 2), DEAD);
        assert_eq!(next_cell(ALIVE, 1), DEAD);
        assert_eq!(next_cell(ALIVE, 4), DEAD);
    }

    #[test]
    fn all_dead_is_a_fixed_point() {
        for (w, h) in [(1, 1), (3, 7), (16, 16), (31, 5)] {
            let grid = Grid::new(w, h).unwrap();
            assert_eq!(step_grid(&grid), grid);
            assert_eq!(advance(&grid, 5), grid);
        }
    }

    #[test]
    fn rule_commutes_with_half_turn_rotation() {
        for seed in 0..12 {
            let grid = random_grid(13, 9, seed);
            let rotated_then_stepped = step_grid(&rotate_180(&grid));
            let stepped_then_rotated = rotate_180(&step_grid(&grid));
            assert_eq!(rotated_then_stepped, stepped_then_rotated, "seed {seed}");
        }
    }

    #[test]
    fn blinker_has_period_two() {
        let grid = Grid::with_alive(5, 5, &cells(&[(1, 2), (2, 2), (3, 2)])).unwrap();
        let once = step_grid(&grid);
        assert_eq!(once.alive_cells(), cells(&[(2, 1), (2, 2), (2, 3)]));
        assert_eq!(step_grid(&once), grid);
    }

    #[test]
    fn blinker_wraps_across_both_edges() {
        // Horizontal blinker straddling the left/right seam on the top row.
        let grid = Grid::with_alive(6, 6, &cells(&[(5, 0), (0, 0), (1, 0)])).unwrap();
        let once = step_grid(&grid);
        assert_eq!(once.alive_cells(), cells(&[(0, 0), (0, 1), (0, 5)]));
        assert_eq!(step_grid(&once), grid);
    }

    #[test]
    fn glider_moves_one_cell_diagonally_every_four_turns() {
        let glider = [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)];
        let grid = Grid::with_alive(16, 16, &cells(&glider)).unwrap();
        let after = advance(&grid, 4);
        let shifted: Vec<(usize, usize)> = glider.iter().map(|&(x, y)| (x + 1, y + 1)).collect();
        assert_eq!(after.alive_count(), 5);
        assert_eq!(after.alive_cells(), cells(&shifted));
    }

    #[test]
    fn band_step_matches_grid_step_on_its_rows() {
        let grid = random_grid(10, 8, 42);
        let stepped = step_grid(&grid);
        let rows = grid.rows();
        let band = Band {
            top: rows[2].clone(),
            interior: rows[3..6].to_vec(),
            bottom: rows[6].clone(),
        };
        assert_eq!(step_band(&band), stepped.rows()[3..6].to_vec());
    }

    #[test]
    fn two_neighbours_preserve_the_original_byte() {
        // A non-canonical byte with two live neighbours survives untouched.
        let row = vec![ALIVE, 7, ALIVE];
        let out = step_row(&[DEAD; 3], &row, &[DEAD; 3], 3);
        assert_eq!(out[1], 7);
    }
}
