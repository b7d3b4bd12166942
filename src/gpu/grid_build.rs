use bevy::render::render_resource::{
    BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer,
    BufferBindingType, ShaderStages,
};
use bevy::render::renderer::RenderDevice;

use crate::gpu::buffers::GpuSphBuffers;

pub const WORKGROUP_SIZE: u32 = 256;

/// `@binding(n)` slots of `sph_solver.wgsl`, all in group 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SphBinding {
    Params = 0,
    Positions = 1,
    Velocities = 2,
    Densities = 3,
    Pressures = 4,
    PressureForces = 5,
    ViscosityForces = 6,
    ReorderedPositions = 7,
    ReorderedVelocities = 8,
    CellIndexOfParticle = 9,
    CellCounts = 10,
    CellStartIndices = 11,
    ScatterOffsets = 12,
}

impl SphBinding {
    pub const fn index(self) -> u32 {
        self as u32
    }

    pub fn layout_entry(self) -> BindGroupLayoutEntry {
        let ty = match self {
            SphBinding::Params => BufferBindingType::Uniform,
            // atomics need read_write, the rest follow for simplicity
            _ => BufferBindingType::Storage { read_only: false },
        };
        BindGroupLayoutEntry {
            binding: self.index(),
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    pub fn buffer(self, buffers: &GpuSphBuffers) -> &Buffer {
        match self {
            SphBinding::Params => &buffers.params,
            SphBinding::Positions => &buffers.positions,
            SphBinding::Velocities => &buffers.velocities,
            SphBinding::Densities => &buffers.densities,
            SphBinding::Pressures => &buffers.pressures,
            SphBinding::PressureForces => &buffers.pressure_forces,
            SphBinding::ViscosityForces => &buffers.viscosity_forces,
            SphBinding::ReorderedPositions => &buffers.reordered_positions,
            SphBinding::ReorderedVelocities => &buffers.reordered_velocities,
            SphBinding::CellIndexOfParticle => &buffers.cell_index_of_particle,
            SphBinding::CellCounts => &buffers.cell_counts,
            SphBinding::CellStartIndices => &buffers.cell_start_indices,
            SphBinding::ScatterOffsets => &buffers.scatter_offsets,
        }
    }
}

/// What a pass runs one invocation for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lanes {
    Particles,
    Cells,
    /// One invocation in total (sequential scan).
    Single,
}

/// One compute stage: its entry point and the bindings it touches.
#[derive(Clone, Copy, Debug)]
pub struct SphPass {
    pub label: &'static str,
    pub entry_point: &'static str,
    pub lanes: Lanes,
    pub bindings: &'static [SphBinding],
}

impl SphPass {
    pub fn workgroups(&self, particle_count: u32, total_cells: u32) -> u32 {
        match self.lanes {
            Lanes::Particles => particle_count.div_ceil(WORKGROUP_SIZE),
            Lanes::Cells => total_cells.div_ceil(WORKGROUP_SIZE),
            Lanes::Single => 1,
        }
    }

    pub fn bind_group_layout(&self, render_device: &RenderDevice) -> BindGroupLayout {
        let entries: Vec<BindGroupLayoutEntry> =
            self.bindings.iter().map(|b| b.layout_entry()).collect();
        render_device.create_bind_group_layout(Some(self.label), &entries)
    }

    pub fn bind_group(
        &self,
        render_device: &RenderDevice,
        layout: &BindGroupLayout,
        buffers: &GpuSphBuffers,
    ) -> BindGroup {
        let entries: Vec<BindGroupEntry> = self
            .bindings
            .iter()
            .map(|b| BindGroupEntry {
                binding: b.index(),
                resource: b.buffer(buffers).as_entire_binding(),
            })
            .collect();
        render_device.create_bind_group(Some(self.label), layout, &entries)
    }
}

use SphBinding::*;

/// reset -> count -> prefix sum -> scatter -> switch
pub const GRID_PASSES: [SphPass; 5] = [
    SphPass {
        label: "sph_reset_cells",
        entry_point: "reset_cells",
        lanes: Lanes::Cells,
        bindings: &[Params, CellCounts, ScatterOffsets],
    },
    SphPass {
        label: "sph_count_particles",
        entry_point: "count_particles",
        lanes: Lanes::Particles,
        bindings: &[Params, Positions, CellIndexOfParticle, CellCounts],
    },
    SphPass {
        label: "sph_prefix_sum",
        entry_point: "prefix_sum",
        lanes: Lanes::Single,
        bindings: &[Params, CellCounts, CellStartIndices],
    },
    SphPass {
        label: "sph_scatter_particles",
        entry_point: "scatter_particles",
        lanes: Lanes::Particles,
        bindings: &[
            Params,
            Positions,
            Velocities,
            ReorderedPositions,
            ReorderedVelocities,
            CellIndexOfParticle,
            CellStartIndices,
            ScatterOffsets,
        ],
    },
    SphPass {
        label: "sph_switch_buffers",
        entry_point: "switch_buffers",
        lanes: Lanes::Particles,
        bindings: &[Params, Positions, Velocities, ReorderedPositions, ReorderedVelocities],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_cover_every_lane() {
        let pass = &GRID_PASSES[1];
        assert_eq!(pass.workgroups(256, 0), 1);
        assert_eq!(pass.workgroups(257, 0), 2);
        assert_eq!(GRID_PASSES[0].workgroups(0, 8192), 32);
        assert_eq!(GRID_PASSES[2].workgroups(10_000, 8192), 1);
    }

    #[test]
    fn storage_bindings_fit_default_limits() {
        for pass in &GRID_PASSES {
            let storage = pass.bindings.iter().filter(|&&b| b != Params).count();
            assert!(storage <= 8, "{} binds {storage} storage buffers", pass.label);
            assert_eq!(pass.bindings[0], Params);
        }
    }
}
