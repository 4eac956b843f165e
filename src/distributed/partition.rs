//! Row-band partitioning
//!
//! An `H × W` world is split across `N` workers into contiguous row bands.
//! With `main = H / N`, the first `N - 1` bands get `main` rows each and the
//! last band absorbs the remainder, so band heights always sum to `H`.
//!
//! Each band is shipped with one halo row above and one below, read from the
//! world with toroidal wraparound. Halo rows are copies; the worker owning the
//! band never returns them.
//!
//! ```text
//! H = 10, N = 3, main = 3
//!
//!   row 9  (halo)          row 2  (halo)          row 5  (halo)
//!   rows 0..3  -> w0       rows 3..6  -> w1       rows 6..10 -> w2
//!   row 3  (halo)          row 6  (halo)          row 0  (halo)
//! ```

use crate::distributed::protocol::Rows;
use crate::error::{BrokerError, BrokerResult};
use crate::world::World;

/// One worker's share of the world for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Position in the run; also the reassembly position
    pub index: usize,
    /// First world row owned by this band
    pub first_row: usize,
    /// Owned rows (halos excluded)
    pub rows: usize,
    /// Owned rows with one halo row above and one below
    pub section: Rows,
    /// Worker that owns the band
    pub worker: String,
    /// Worker that owns the row right below the band (wraps to the first worker)
    pub bottom_neighbor: String,
}

impl Partition {
    /// Row count including both halos
    pub fn height_with_halo(&self) -> usize {
        self.rows + 2
    }

    pub fn width(&self) -> usize {
        self.section.first().map_or(0, Vec::len)
    }

    /// Owned rows without halos
    pub fn interior(&self) -> &[Vec<u8>] {
        &self.section[1..=self.rows]
    }
}

/// Check a world and worker count before anything is dispatched
pub fn validate(world: &World, height: usize, width: usize, workers: usize) -> BrokerResult<()> {
    if workers == 0 {
        return Err(BrokerError::NoWorkers);
    }
    if workers > height {
        return Err(BrokerError::TooManyWorkers { workers, height });
    }
    if width == 0 {
        return Err(BrokerError::InvalidWorld("width must be at least 1".to_string()));
    }
    if !world.has_shape(height, width) {
        return Err(BrokerError::InvalidWorld(format!(
            "declared {}x{} but grid is {} rows (first row {} cells)",
            height,
            width,
            world.height(),
            world.width()
        )));
    }
    Ok(())
}

/// Band layout as `(first_row, rows)` pairs
pub fn plan(height: usize, workers: usize) -> BrokerResult<Vec<(usize, usize)>> {
    if workers == 0 {
        return Err(BrokerError::NoWorkers);
    }
    if workers > height {
        return Err(BrokerError::TooManyWorkers { workers, height });
    }

    let main = height / workers;
    let mut bands: Vec<(usize, usize)> = (0..workers - 1).map(|i| (i * main, main)).collect();

    let last_start = (workers - 1) * main;
    bands.push((last_start, height - last_start));

    Ok(bands)
}

/// Split a world across workers in registration order
pub fn partition(world: &World, workers: &[String]) -> BrokerResult<Vec<Partition>> {
    let height = world.height();
    validate(world, height, world.width(), workers.len())?;

    let partitions = plan(height, workers.len())?
        .into_iter()
        .enumerate()
        .map(|(index, (first_row, rows))| {
            let first = first_row as isize;
            let section = (first - 1..=first + rows as isize)
                .map(|r| world.wrapped_row(r).to_vec())
                .collect();

            Partition {
                index,
                first_row,
                rows,
                section,
                worker: workers[index].clone(),
                bottom_neighbor: workers[(index + 1) % workers.len()].clone(),
            }
        })
        .collect();

    Ok(partitions)
}

/// Rebuild a world from halo-free bands given in partition order
pub fn reassemble(bands: Vec<Rows>) -> World {
    World::concat(bands)
}
