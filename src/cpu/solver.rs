//! The SPH orchestrator: owns one generation of buffers and runs the
//! per-step pipeline over them.

use bevy::log::{debug, info};
use bevy::prelude::Resource;
use glam::Vec3;

use crate::config::{BoxExtents, KernelConstants, SphConfig};
use crate::cpu::buffers::{CellBuffers, ParticleBuffers};
use crate::cpu::device::{ComputeDevice, ParallelDevice};
use crate::cpu::grid::GridParams;
use crate::cpu::grid_build::build_grid;
use crate::cpu::integrate::integrate;
use crate::cpu::kernels::{
    Neighborhood, compute_density, compute_pressure, compute_pressure_force, compute_viscosity,
};
use crate::error::{ConfigError, SimError};

/// Seeds are scaled by this so none lands on a wall.
pub const SEED_FILL: f32 = 0.98;

/// PCG integer hash.
#[inline]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// `pcg_hash` mapped to `[0, 1)` from its top 24 bits.
#[inline]
pub fn unit_hash(seed: u32) -> f32 {
    (pcg_hash(seed) >> 8) as f32 / (1u32 << 24) as f32
}

/// Deterministic start position of particle `i`, strictly inside the box.
pub fn seed_position(i: usize, extents: &BoxExtents) -> Vec3 {
    let seed = (i as u32).wrapping_mul(3);
    let unit = Vec3::new(
        unit_hash(seed),
        unit_hash(seed.wrapping_add(1)),
        unit_hash(seed.wrapping_add(2)),
    );
    (unit - 0.5) * extents.as_vec3() * SEED_FILL
}

pub fn seed_positions(n: usize, extents: &BoxExtents) -> Vec<Vec3> {
    (0..n).map(|i| seed_position(i, extents)).collect()
}

// Everything sized by one (particle count, box, config) triple.
struct Generation {
    config: SphConfig,
    kernels: KernelConstants,
    extents: BoxExtents,
    grid: GridParams,
    particles: ParticleBuffers,
    cells: CellBuffers,
}

impl Generation {
    fn build<D: ComputeDevice>(
        device: &D,
        particle_count: usize,
        extents: BoxExtents,
        config: SphConfig,
    ) -> Result<Self, SimError> {
        // particle indices travel as u32 through the scatter stage
        if particle_count == 0 || u32::try_from(particle_count).is_err() {
            return Err(ConfigError::ParticleCount(particle_count).into());
        }
        config.validate()?;
        let grid = GridParams::new(extents, config.smoothing_radius)?;

        let mut particles = ParticleBuffers::allocate(device, particle_count)?;
        let cells = CellBuffers::allocate(device, particle_count, grid.total_cell_count)?;

        device.dispatch_map("seed_positions", &mut particles.position, |i| {
            seed_position(i, &extents)
        })?;

        Ok(Self {
            kernels: config.kernels(),
            config,
            extents,
            grid,
            particles,
            cells,
        })
    }
}

/// Grid-accelerated SPH solver.
///
/// `step` is synchronous: when it returns every stage has completed on every
/// lane. If it fails the particle state is unspecified and the caller should
/// reinitialize.
#[derive(Resource)]
pub struct FluidSolver<D: ComputeDevice = ParallelDevice> {
    device: D,
    state: Generation,
    generation: u64,
    steps: u64,
}

impl<D: ComputeDevice> FluidSolver<D> {
    /// Allocates and seeds the first generation.
    pub fn initialize(
        device: D,
        particle_count: usize,
        extents: BoxExtents,
        config: SphConfig,
    ) -> Result<Self, SimError> {
        let state = Generation::build(&device, particle_count, extents, config)?;
        let solver = Self {
            device,
            state,
            generation: 0,
            steps: 0,
        };
        solver.log_generation();
        Ok(solver)
    }

    /// Advances the simulation by one `delta`.
    pub fn step(&mut self) -> Result<(), SimError> {
        let Generation {
            config,
            kernels,
            extents,
            grid,
            particles,
            cells,
        } = &mut self.state;
        let device = &self.device;

        build_grid(device, grid, config.prefix_scan, particles, cells)?;

        {
            let ParticleBuffers {
                position,
                velocity,
                density,
                pressure,
                pressure_force,
                viscosity_force,
                ..
            } = &mut *particles;
            let hood = Neighborhood {
                grid,
                cells,
                position,
                policy: config.neighbor_policy,
            };

            compute_density(device, config, kernels, &hood, density)?;
            compute_pressure(device, config, density, pressure)?;
            let fields = (&density[..], &pressure[..]);
            compute_pressure_force(device, config, kernels, &hood, fields, pressure_force)?;
            let fields = (&density[..], &velocity[..]);
            compute_viscosity(device, config, kernels, &hood, fields, viscosity_force)?;
        }

        integrate(device, config, extents, particles)?;
        self.steps += 1;
        Ok(())
    }

    /// Runs only the grid stages against the current positions.
    pub fn rebuild_grid(&mut self) -> Result<(), SimError> {
        let Generation {
            config,
            grid,
            particles,
            cells,
            ..
        } = &mut self.state;
        build_grid(&self.device, grid, config.prefix_scan, particles, cells)?;
        Ok(())
    }

    /// Replaces the whole generation. The current one stays live if the new one
    /// cannot be built.
    pub fn reinitialize(
        &mut self,
        particle_count: usize,
        extents: BoxExtents,
        config: SphConfig,
    ) -> Result<(), SimError> {
        let next = Generation::build(&self.device, particle_count, extents, config)?;
        self.state = next;
        self.generation += 1;
        self.steps = 0;
        self.log_generation();
        Ok(())
    }

    pub fn set_particle_count(&mut self, particle_count: usize) -> Result<(), SimError> {
        self.reinitialize(particle_count, self.state.extents, self.state.config)
    }

    pub fn set_box_extents(&mut self, width: f32, height: f32, depth: f32) -> Result<(), SimError> {
        self.reinitialize(
            self.state.particles.len(),
            BoxExtents::new(width, height, depth),
            self.state.config,
        )
    }

    pub fn set_config(&mut self, config: SphConfig) -> Result<(), SimError> {
        self.reinitialize(self.state.particles.len(), self.state.extents, config)
    }

    /// Overwrites positions and velocities in place. Both slices must hold
    /// exactly `particle_count()` entries.
    pub fn set_particle_state(
        &mut self,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> Result<(), SimError> {
        let expected = self.state.particles.len();
        for actual in [positions.len(), velocities.len()] {
            if actual != expected {
                return Err(ConfigError::ParticleStateLength { expected, actual }.into());
            }
        }

        self.state.particles.position.copy_from_slice(positions);
        self.state.particles.velocity.copy_from_slice(velocities);
        debug!("particle state overwritten ({expected} particles)");
        Ok(())
    }

    fn log_generation(&self) {
        let counts = self.state.grid.counts;
        info!(
            "sph generation {}: {} particles, {}x{}x{} cells, {} device",
            self.generation,
            self.state.particles.len(),
            counts.x,
            counts.y,
            counts.z,
            self.device.label(),
        );
    }

    // read-only views, valid until the next reinitialization

    pub fn positions(&self) -> &[Vec3] {
        &self.state.particles.position
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.state.particles.velocity
    }

    pub fn densities(&self) -> &[f32] {
        &self.state.particles.density
    }

    pub fn pressures(&self) -> &[f32] {
        &self.state.particles.pressure
    }

    pub fn pressure_forces(&self) -> &[Vec3] {
        &self.state.particles.pressure_force
    }

    pub fn viscosity_forces(&self) -> &[Vec3] {
        &self.state.particles.viscosity_force
    }

    pub fn cells(&self) -> &CellBuffers {
        &self.state.cells
    }

    pub fn grid_params(&self) -> &GridParams {
        &self.state.grid
    }

    pub fn config(&self) -> &SphConfig {
        &self.state.config
    }

    pub fn kernels(&self) -> &KernelConstants {
        &self.state.kernels
    }

    pub fn extents(&self) -> BoxExtents {
        self.state.extents
    }

    pub fn particle_count(&self) -> usize {
        self.state.particles.len()
    }

    /// Number of completed reinitializations.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Steps taken in the current generation.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}
