//! Neighbor-counting rule
//!
//! Conway's rule (birth on 3, survive on 2 or 3) applied to a band of rows.
//! The band is bounded above and below by halo rows; columns wrap around.

use crate::world::{World, ALIVE, DEAD};

/// Advance a band by one turn
///
/// `top` and `bottom` are the rows immediately above and below the band.
/// Returns the new band (same shape as `band`, halos excluded).
pub fn step_band(top: &[u8], band: &[Vec<u8>], bottom: &[u8]) -> Vec<Vec<u8>> {
    let height = band.len();
    let mut next = Vec::with_capacity(height);

    for r in 0..height {
        let above: &[u8] = if r == 0 { top } else { &band[r - 1] };
        let below: &[u8] = if r + 1 == height { bottom } else { &band[r + 1] };
        let row = &band[r];
        let width = row.len();
        let mut out = vec![DEAD; width];

        for c in 0..width {
            let left = (c + width - 1) % width;
            let right = (c + 1) % width;
            let neighbours = [
                above[left], above[c], above[right],
                row[left], row[right],
                below[left], below[c], below[right],
            ]
            .iter()
            .filter(|&&cell| cell == ALIVE)
            .count();

            out[c] = match (row[c] == ALIVE, neighbours) {
                (true, 2) | (true, 3) | (false, 3) => ALIVE,
                _ => DEAD,
            };
        }
        next.push(out);
    }

    next
}

/// Advance a whole toroidal world by `turns` turns on one thread
///
/// Used as the sequential reference for the distributed result.
pub fn evolve(world: &World, turns: u32) -> World {
    let mut current = world.clone();
    for _ in 0..turns {
        let top = current.wrapped_row(-1).to_vec();
        let bottom = current.wrapped_row(current.height() as isize).to_vec();
        current = World::from_rows(step_band(&top, current.rows(), &bottom));
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with(height: usize, width: usize, cells: &[(usize, usize)]) -> World {
        let mut world = World::new(height, width);
        for &(r, c) in cells {
            world.set(r, c, ALIVE);
        }
        world
    }

    #[test]
    fn test_blinker_oscillates() {
        let horizontal = world_with(5, 5, &[(2, 1), (2, 2), (2, 3)]);
        let vertical = world_with(5, 5, &[(1, 2), (2, 2), (3, 2)]);

        assert_eq!(evolve(&horizontal, 1), vertical);
        assert_eq!(evolve(&horizontal, 2), horizontal);
    }

    #[test]
    fn test_block_is_still() {
        let block = world_with(4, 4, &[(1, 1), (1, 2), (2, 1), (2, 2)]);
        assert_eq!(evolve(&block, 7), block);
    }

    #[test]
    fn test_wraps_across_edges() {
        // Blinker straddling the top/bottom seam
        let seam = world_with(6, 6, &[(5, 3), (0, 3), (1, 3)]);
        let flat = world_with(6, 6, &[(0, 2), (0, 3), (0, 4)]);
        assert_eq!(evolve(&seam, 1), flat);

        // Blinker straddling the left/right seam
        let side = world_with(6, 6, &[(3, 5), (3, 0), (3, 1)]);
        let upright = world_with(6, 6, &[(2, 0), (3, 0), (4, 0)]);
        assert_eq!(evolve(&side, 1), upright);
    }

    #[test]
    fn test_glider_population_is_stable() {
        let glider = world_with(8, 8, &[(0, 1), (1, 2), (2, 0), (2, 1), (2, 2)]);
        let later = evolve(&glider, 12);
        assert_eq!(later.alive_count(), 5);
    }

    #[test]
    fn test_empty_world_stays_empty() {
        assert_eq!(evolve(&World::default(), 3), World::default());
    }
}
