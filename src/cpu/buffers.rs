use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;

use crate::cpu::device::ComputeDevice;
use crate::error::DeviceError;

/// Per-particle arrays of one generation. Every array has length `N`.
#[derive(Debug)]
pub struct ParticleBuffers {
    pub position: Vec<Vec3>,
    pub velocity: Vec<Vec3>,
    pub density: Vec<f32>,
    pub pressure: Vec<f32>,
    pub pressure_force: Vec<Vec3>,
    pub viscosity_force: Vec<Vec3>,
    // cell-sorted copies written by scatter, copied back by switch
    pub reordered_position: Vec<Vec3>,
    pub reordered_velocity: Vec<Vec3>,
}

impl ParticleBuffers {
    pub fn allocate<D: ComputeDevice>(device: &D, n: usize) -> Result<Self, DeviceError> {
        Ok(Self {
            position: device.alloc_filled("position", n, Vec3::ZERO)?,
            velocity: device.alloc_filled("velocity", n, Vec3::ZERO)?,
            density: device.alloc_filled("density", n, 0.0)?,
            pressure: device.alloc_filled("pressure", n, 0.0)?,
            pressure_force: device.alloc_filled("pressure_force", n, Vec3::ZERO)?,
            viscosity_force: device.alloc_filled("viscosity_force", n, Vec3::ZERO)?,
            reordered_position: device.alloc_filled("reordered_position", n, Vec3::ZERO)?,
            reordered_velocity: device.alloc_filled("reordered_velocity", n, Vec3::ZERO)?,
        })
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }
}

/// Occupancy summary of the grid after a build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GridStats {
    pub occupied_cells: usize,
    pub max_cell_occupancy: u32,
    pub total_particles: u64,
}

/// Grid arrays. `cell_count`/`scatter_offset` have one entry per cell,
/// `cell_index_of_particle`/`reorder_source` one per particle.
#[derive(Debug)]
pub struct CellBuffers {
    pub cell_index_of_particle: Vec<u32>,
    pub cell_count: Vec<AtomicU32>,
    /// Exclusive prefix sum of `cell_count`.
    pub cell_start_index: Vec<u32>,
    pub scatter_offset: Vec<AtomicU32>,
    /// Pre-scatter particle index that claimed each reordered slot.
    pub reorder_source: Vec<AtomicU32>,
}

impl CellBuffers {
    pub fn allocate<D: ComputeDevice>(
        device: &D,
        n: usize,
        cells: usize,
    ) -> Result<Self, DeviceError> {
        Ok(Self {
            cell_index_of_particle: device.alloc_filled("cell_index_of_particle", n, 0)?,
            cell_count: device.alloc_with("cell_count", cells, || AtomicU32::new(0))?,
            cell_start_index: device.alloc_filled("cell_start_index", cells, 0)?,
            scatter_offset: device.alloc_with("scatter_offset", cells, || AtomicU32::new(0))?,
            reorder_source: device.alloc_with("reorder_source", n, || AtomicU32::new(0))?,
        })
    }

    pub fn cell_total(&self) -> usize {
        self.cell_count.len()
    }

    #[inline]
    pub fn count(&self, cell: usize) -> u32 {
        self.cell_count[cell].load(Ordering::Relaxed)
    }

    /// Reordered slot range owned by `cell`.
    #[inline]
    pub fn cell_range(&self, cell: usize) -> std::ops::Range<usize> {
        let start = self.cell_start_index[cell] as usize;
        start..start + self.count(cell) as usize
    }

    pub fn stats(&self) -> GridStats {
        let mut stats = GridStats::default();
        for count in self.cell_count.iter().map(|c| c.load(Ordering::Relaxed)) {
            if count > 0 {
                stats.occupied_cells += 1;
            }
            stats.max_cell_occupancy = stats.max_cell_occupancy.max(count);
            stats.total_particles += count as u64;
        }
        stats
    }
}
