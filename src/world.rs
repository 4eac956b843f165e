//! World grid
//!
//! The world is a `height × width` grid of single-byte cells. Row and column
//! indices wrap modulo the dimension (toroidal topology). The broker never keeps
//! a world between requests; a `World` only lives as the input or output of one
//! `ProcessWorld` call, or as a snapshot assembled from worker bands.

use serde::{Deserialize, Serialize};

/// Cell value for a live cell
pub const ALIVE: u8 = 255;

/// Cell value for a dead cell
pub const DEAD: u8 = 0;

/// A rectangular grid of cells stored row-major
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct World {
    rows: Vec<Vec<u8>>,
}

impl World {
    /// Create an all-dead world
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            rows: vec![vec![DEAD; width]; height],
        }
    }

    /// Wrap existing rows
    pub fn from_rows(rows: Vec<Vec<u8>>) -> Self {
        Self { rows }
    }

    /// Build a world by concatenating bands in order
    pub fn concat<I>(bands: I) -> Self
    where
        I: IntoIterator<Item = Vec<Vec<u8>>>,
    {
        let rows = bands.into_iter().flatten().collect();
        Self { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Width of the first row (0 for an empty world)
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<u8>> {
        self.rows
    }

    /// Row at a possibly out-of-range index, wrapped modulo height
    ///
    /// Row `-1` resolves to `height - 1` and row `height` resolves to `0`.
    /// An empty world has only the empty row.
    pub fn wrapped_row(&self, index: isize) -> &[u8] {
        let height = self.rows.len() as isize;
        if height == 0 {
            return &[];
        }
        let wrapped = index.rem_euclid(height) as usize;
        &self.rows[wrapped]
    }

    /// Check that the grid really is `height × width`
    pub fn has_shape(&self, height: usize, width: usize) -> bool {
        self.rows.len() == height && self.rows.iter().all(|row| row.len() == width)
    }

    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        self.rows[row][col] = value;
    }

    /// Number of live cells
    pub fn alive_count(&self) -> usize {
        alive_in_rows(&self.rows)
    }
}

impl From<Vec<Vec<u8>>> for World {
    fn from(rows: Vec<Vec<u8>>) -> Self {
        Self::from_rows(rows)
    }
}

/// Count live cells in a band of rows
pub fn alive_in_rows(rows: &[Vec<u8>]) -> usize {
    rows.iter()
        .map(|row| row.iter().filter(|&&cell| cell == ALIVE).count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(height: usize, width: usize) -> World {
        World::from_rows((0..height).map(|r| vec![r as u8; width]).collect())
    }

    #[test]
    fn test_wrapped_row_edges() {
        let world = numbered(4, 3);
        assert_eq!(world.wrapped_row(-1), &[3, 3, 3]);
        assert_eq!(world.wrapped_row(4), &[0, 0, 0]);
        assert_eq!(world.wrapped_row(2), &[2, 2, 2]);
        assert_eq!(world.wrapped_row(-5), &[3, 3, 3]);

        assert!(World::default().wrapped_row(-1).is_empty());
    }

    #[test]
    fn test_shape_check() {
        let world = numbered(4, 3);
        assert!(world.has_shape(4, 3));
        assert!(!world.has_shape(3, 3));
        assert!(!world.has_shape(4, 4));

        let ragged = World::from_rows(vec![vec![0; 3], vec![0; 2]]);
        assert!(!ragged.has_shape(2, 3));
    }

    #[test]
    fn test_alive_count() {
        let mut world = World::new(3, 3);
        assert_eq!(world.alive_count(), 0);
        world.set(0, 0, ALIVE);
        world.set(2, 1, ALIVE);
        assert_eq!(world.alive_count(), 2);
        assert_eq!(world.rows()[2][1], ALIVE);
        assert_eq!(world.rows()[1][1], DEAD);
    }

    #[test]
    fn test_concat_preserves_order() {
        let world = World::concat(vec![vec![vec![1]], vec![vec![2], vec![3]]]);
        assert_eq!(world.rows(), &[vec![1], vec![2], vec![3]]);
    }
}
