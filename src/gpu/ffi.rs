use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::config::{BoxExtents, NeighborPolicy, SphConfig};
use crate::cpu::grid::GridParams;

// not using glam in the gpu structs to keep the WGSL layout explicit

/// `vec4<f32>` storage element; positions and velocities use xyz.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuVec4(pub [f32; 4]);

impl GpuVec4 {
    pub fn from_vec3(v: Vec3, w: f32) -> Self {
        Self([v.x, v.y, v.z, w])
    }

    pub fn xyz(&self) -> Vec3 {
        Vec3::new(self.0[0], self.0[1], self.0[2])
    }
}

/// Mirrors `SimParams` in `sph_solver.wgsl`. 128 bytes, uniform-compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuSimParams {
    pub half_extents: [f32; 4],
    pub min_coord: [f32; 4],
    pub gravity: [f32; 4],
    pub cell_counts: [u32; 4], // w = total cells
    pub particle_count: u32,
    pub clamp_neighbors: u32,
    pub mass: f32,
    pub rest_density: f32,
    pub pressure_stiffness: f32,
    pub viscosity_mu: f32,
    pub delta: f32,
    pub restitution: f32,
    pub cell_size: f32,
    pub h: f32,
    pub h2: f32,
    pub h6: f32,
    pub poly6: f32,
    pub spiky: f32,
    pub viscosity_kernel: f32,
    pub _pad: f32,
}

impl GpuSimParams {
    pub fn new(
        config: &SphConfig,
        extents: &BoxExtents,
        grid: &GridParams,
        particle_count: u32,
    ) -> Self {
        let k = config.kernels();
        let half = extents.half();

        Self {
            half_extents: [half.x, half.y, half.z, 0.0],
            min_coord: [grid.min_coord.x, grid.min_coord.y, grid.min_coord.z, 0.0],
            gravity: [config.gravity.x, config.gravity.y, config.gravity.z, 0.0],
            cell_counts: [
                grid.counts.x,
                grid.counts.y,
                grid.counts.z,
                grid.total_cell_count as u32,
            ],
            particle_count,
            clamp_neighbors: (config.neighbor_policy == NeighborPolicy::Clamp) as u32,
            mass: config.mass,
            rest_density: config.rest_density,
            pressure_stiffness: config.pressure_stiffness,
            viscosity_mu: config.viscosity_mu,
            delta: config.delta,
            restitution: config.restitution,
            cell_size: grid.cell_size,
            h: k.h,
            h2: k.h2,
            h6: k.h6,
            poly6: k.poly6,
            spiky: k.spiky,
            viscosity_kernel: k.viscosity,
            _pad: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<GpuSimParams>(), 128);
        assert_eq!(std::mem::size_of::<GpuSimParams>() % 16, 0);
        assert_eq!(std::mem::size_of::<GpuVec4>(), 16);
    }

    #[test]
    fn params_carry_grid_and_policy() {
        let extents = BoxExtents::default();
        let config = SphConfig::default();
        let grid = GridParams::new(extents, config.smoothing_radius).unwrap();
        let params = GpuSimParams::new(&config, &extents, &grid, 10);

        assert_eq!(params.cell_counts, [32, 16, 16, 32 * 16 * 16]);
        assert_eq!(params.half_extents[0], 16.0);
        assert_eq!(params.clamp_neighbors, 1);
        assert_eq!(params.gravity[1], -9.8);
    }
}
