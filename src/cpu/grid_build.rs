//! Per-step spatial hash rebuild: reset, count, prefix sum, scatter, switch.
//!
//! Each function is one stage; the device call inside returns only when all
//! lanes are done, so stages never overlap.

use std::sync::atomic::Ordering;

use bevy::log::trace;

use crate::config::PrefixScan;
use crate::cpu::buffers::{CellBuffers, ParticleBuffers};
use crate::cpu::device::ComputeDevice;
use crate::cpu::grid::GridParams;
use crate::error::DeviceError;

/// Zeroes the per-cell counters.
pub fn reset_cells<D: ComputeDevice>(device: &D, cells: &CellBuffers) -> Result<(), DeviceError> {
    device.dispatch("reset_cells", cells.cell_total(), |c| {
        cells.cell_count[c].store(0, Ordering::Relaxed);
        cells.scatter_offset[c].store(0, Ordering::Relaxed);
    })
}

/// Bins every particle and bumps its cell's counter.
pub fn count_particles<D: ComputeDevice>(
    device: &D,
    grid: &GridParams,
    particles: &ParticleBuffers,
    cells: &mut CellBuffers,
) -> Result<(), DeviceError> {
    let CellBuffers {
        cell_index_of_particle,
        cell_count,
        ..
    } = cells;
    let position = &particles.position;

    device.dispatch_map("count_particles", cell_index_of_particle, |i| {
        let cell = grid.cell_index(position[i]);
        cell_count[cell].fetch_add(1, Ordering::Relaxed);
        cell as u32
    })
}

/// Exclusive scan of `cell_count` into `cell_start_index`.
pub fn prefix_sum<D: ComputeDevice>(
    device: &D,
    scan: PrefixScan,
    cells: &mut CellBuffers,
) -> Result<(), DeviceError> {
    match scan {
        PrefixScan::Sequential => sequential_scan(device, cells),
        PrefixScan::Blocked { block_size } => blocked_scan(device, block_size.max(1), cells),
    }
}

fn sequential_scan<D: ComputeDevice>(
    device: &D,
    cells: &mut CellBuffers,
) -> Result<(), DeviceError> {
    let CellBuffers {
        cell_count,
        cell_start_index,
        ..
    } = cells;

    device.run_single("prefix_sum", || {
        let mut running = 0u32;
        for (start, count) in cell_start_index.iter_mut().zip(cell_count.iter()) {
            *start = running;
            running += count.load(Ordering::Relaxed);
        }
    })
}

// Workgroup layout: scan inside each block, scan the block totals, add them back.
fn blocked_scan<D: ComputeDevice>(
    device: &D,
    block_size: usize,
    cells: &mut CellBuffers,
) -> Result<(), DeviceError> {
    let CellBuffers {
        cell_count,
        cell_start_index,
        ..
    } = cells;
    let cell_count = &*cell_count;
    let blocks = cell_count.len().div_ceil(block_size);
    trace!("prefix_sum: {blocks} blocks of {block_size}");

    device.dispatch_groups("block_scan", cell_start_index, block_size, |block, starts| {
        let base = block * block_size;
        let mut running = 0u32;
        for (offset, start) in starts.iter_mut().enumerate() {
            *start = running;
            running += cell_count[base + offset].load(Ordering::Relaxed);
        }
    })?;

    let mut block_sums = device.alloc_filled("block_sums", blocks, 0u32)?;
    {
        let starts = &*cell_start_index;
        device.dispatch_map("block_sums", &mut block_sums, |block| {
            let last = ((block + 1) * block_size).min(cell_count.len()) - 1;
            starts[last] + cell_count[last].load(Ordering::Relaxed)
        })?;
    }

    device.run_single("block_sums_scan", || {
        let mut running = 0u32;
        for sum in block_sums.iter_mut() {
            let total = *sum;
            *sum = running;
            running += total;
        }
    })?;

    let block_sums = &block_sums;
    device.dispatch_groups("add_back", cell_start_index, block_size, |block, starts| {
        let offset = block_sums[block];
        for start in starts {
            *start += offset;
        }
    })
}

/// Claims a slot per particle inside its cell range and gathers the
/// cell-sorted copies of position and velocity.
pub fn scatter_particles<D: ComputeDevice>(
    device: &D,
    particles: &mut ParticleBuffers,
    cells: &CellBuffers,
) -> Result<(), DeviceError> {
    device.dispatch("scatter_particles", particles.len(), |i| {
        let cell = cells.cell_index_of_particle[i] as usize;
        let slot = cells.scatter_offset[cell].fetch_add(1, Ordering::Relaxed);
        let target = cells.cell_start_index[cell] + slot;
        cells.reorder_source[target as usize].store(i as u32, Ordering::Relaxed);
    })?;

    let ParticleBuffers {
        position,
        velocity,
        reordered_position,
        reordered_velocity,
        ..
    } = particles;
    let source = |slot: usize| cells.reorder_source[slot].load(Ordering::Relaxed) as usize;

    device.dispatch_map("gather_position", reordered_position, |s| position[source(s)])?;
    device.dispatch_map("gather_velocity", reordered_velocity, |s| velocity[source(s)])
}

/// Copies the reordered arrays back over the canonical ones.
pub fn switch_buffers<D: ComputeDevice>(
    device: &D,
    particles: &mut ParticleBuffers,
) -> Result<(), DeviceError> {
    let ParticleBuffers {
        position,
        velocity,
        reordered_position,
        reordered_velocity,
        ..
    } = particles;

    device.dispatch_map("switch_position", position, |i| reordered_position[i])?;
    device.dispatch_map("switch_velocity", velocity, |i| reordered_velocity[i])
}

/// All five grid stages in order.
pub fn build_grid<D: ComputeDevice>(
    device: &D,
    grid: &GridParams,
    scan: PrefixScan,
    particles: &mut ParticleBuffers,
    cells: &mut CellBuffers,
) -> Result<(), DeviceError> {
    reset_cells(device, cells)?;
    count_particles(device, grid, particles, cells)?;
    prefix_sum(device, scan, cells)?;
    scatter_particles(device, particles, cells)?;
    switch_buffers(device, particles)
}
