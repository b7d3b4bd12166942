//! Position -> cell mapping for the uniform grid over the simulation box.

use glam::{IVec3, UVec3, Vec3};

use crate::config::{BoxExtents, NeighborPolicy};
use crate::error::ConfigError;

/// Clamped integer cell coordinate of `pos`.
///
/// Particles that are momentarily outside the box land in the nearest edge
/// cell. Non-finite coordinates go to cell 0 on that axis.
#[inline]
pub fn position_to_cell_coord(pos: Vec3, cell_size: f32, counts: UVec3, min_coord: Vec3) -> UVec3 {
    let rel = ((pos - min_coord) / cell_size).floor();
    let axis = |v: f32, count: u32| -> u32 {
        // `as` saturates and maps NaN to 0
        (v as i64).clamp(0, count as i64 - 1) as u32
    };
    UVec3::new(
        axis(rel.x, counts.x),
        axis(rel.y, counts.y),
        axis(rel.z, counts.z),
    )
}

/// Row-major flat index, x fastest.
#[inline]
pub fn coord_to_index(coord: UVec3, count_x: u32, count_y: u32) -> usize {
    let (x, y, z) = (coord.x as usize, coord.y as usize, coord.z as usize);
    x + y * count_x as usize + z * (count_x as usize * count_y as usize)
}

#[inline]
pub fn position_to_cell_index(pos: Vec3, cell_size: f32, counts: UVec3, min_coord: Vec3) -> usize {
    let coord = position_to_cell_coord(pos, cell_size, counts, min_coord);
    coord_to_index(coord, counts.x, counts.y)
}

/// Grid topology for one buffer generation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridParams {
    pub cell_size: f32,
    pub counts: UVec3,
    pub total_cell_count: usize,
    pub min_coord: Vec3,
}

impl GridParams {
    /// Cubic cells of side `smoothing_radius` covering `extents`, centred on the origin.
    pub fn new(extents: BoxExtents, smoothing_radius: f32) -> Result<Self, ConfigError> {
        extents.validate()?;
        if !(smoothing_radius.is_finite() && smoothing_radius > 0.0) {
            return Err(ConfigError::SmoothingRadius(smoothing_radius));
        }

        let cell_size = smoothing_radius;
        let size = extents.as_vec3();
        let cells = (size / cell_size).floor();

        let axes = [('x', size.x, cells.x), ('y', size.y, cells.y), ('z', size.z, cells.z)];
        for (axis, extent, count) in axes {
            if count < 1.0 || count > u32::MAX as f32 {
                return Err(ConfigError::EmptyGrid {
                    axis,
                    extent,
                    cell_size,
                });
            }
        }

        let counts = cells.as_uvec3();
        // cell indices travel as u32 (scatter slots, GPU buffers)
        let total_cell_count = (counts.x as u64)
            .checked_mul(counts.y as u64)
            .and_then(|xy| xy.checked_mul(counts.z as u64))
            .filter(|&total| total <= u32::MAX as u64)
            .ok_or(ConfigError::GridTooLarge {
                counts: counts.to_array(),
            })? as usize;

        Ok(Self {
            cell_size,
            counts,
            total_cell_count,
            min_coord: -size * 0.5,
        })
    }

    #[inline]
    pub fn cell_coord(&self, pos: Vec3) -> UVec3 {
        position_to_cell_coord(pos, self.cell_size, self.counts, self.min_coord)
    }

    #[inline]
    pub fn coord_index(&self, coord: UVec3) -> usize {
        coord_to_index(coord, self.counts.x, self.counts.y)
    }

    #[inline]
    pub fn cell_index(&self, pos: Vec3) -> usize {
        self.coord_index(self.cell_coord(pos))
    }

    /// Calls `visit` with the flat index of each of the 27 cells around `center`,
    /// iterating dz, then dy, then dx.
    ///
    /// With [`NeighborPolicy::Clamp`] the same edge cell can be reported several times.
    #[inline]
    pub fn for_each_neighbor_cell(
        &self,
        center: UVec3,
        policy: NeighborPolicy,
        mut visit: impl FnMut(usize),
    ) {
        let center = center.as_ivec3();
        let max = self.counts.as_ivec3() - IVec3::ONE;

        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let cell = center + IVec3::new(dx, dy, dz);
                    let cell = match policy {
                        NeighborPolicy::Clamp => cell.clamp(IVec3::ZERO, max),
                        NeighborPolicy::Skip => {
                            if cell.cmplt(IVec3::ZERO).any() || cell.cmpgt(max).any() {
                                continue;
                            }
                            cell
                        }
                    };
                    visit(self.coord_index(cell.as_uvec3()));
                }
            }
        }
    }
}
