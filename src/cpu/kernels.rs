//! Density, pressure, pressure force and viscosity.
//!
//! The pair functions are shared with the brute-force reference so both
//! paths evaluate exactly the same arithmetic per neighbor.

use glam::Vec3;

use crate::config::{DENSITY_EPSILON, KernelConstants, MIN_SEPARATION, NeighborPolicy, SphConfig};
use crate::cpu::buffers::CellBuffers;
use crate::cpu::device::ComputeDevice;
use crate::cpu::grid::GridParams;
use crate::error::DeviceError;

// ============================ pair terms =================================

/// Poly6 density contribution of a neighbor at squared distance `r2`, zero outside `h`.
#[inline]
pub fn poly6(k: &KernelConstants, r2: f32) -> f32 {
    if r2 < k.h2 {
        let w = k.h2 - r2;
        k.poly6 * w * w * w
    } else {
        0.0
    }
}

/// A particle's own density under Poly6 (`r = 0`).
#[inline]
pub fn self_density(k: &KernelConstants, mass: f32) -> f32 {
    mass * k.poly6 * k.h6
}

/// Pressure never goes negative, so there is no attraction.
#[inline]
pub fn equation_of_state(density: f32, rest_density: f32, stiffness: f32) -> f32 {
    (stiffness * (density.max(DENSITY_EPSILON) - rest_density)).max(0.0)
}

/// Spiky gradient for `diff = p_i - p_j` at distance `r`.
#[inline]
pub fn spiky_gradient(k: &KernelConstants, diff: Vec3, r: f32) -> Vec3 {
    let falloff = k.h - r;
    k.spiky * falloff * falloff * (diff / r)
}

#[inline]
pub fn viscosity_laplacian(k: &KernelConstants, r: f32) -> f32 {
    k.viscosity * (k.h - r)
}

/// Force on `i` from `j`. Zero outside `h` and for nearly coincident pairs.
#[inline]
pub fn pressure_force_pair(
    k: &KernelConstants,
    mass: f32,
    diff: Vec3,
    r2: f32,
    (pressure_i, density_i): (f32, f32),
    (pressure_j, density_j): (f32, f32),
) -> Vec3 {
    if r2 >= k.h2 {
        return Vec3::ZERO;
    }
    let r = r2.sqrt();
    if r <= MIN_SEPARATION {
        return Vec3::ZERO;
    }

    let rho_i = density_i.max(DENSITY_EPSILON);
    let rho_j = density_j.max(DENSITY_EPSILON);
    let term = pressure_i / (rho_i * rho_i) + pressure_j / (rho_j * rho_j);
    -(mass * mass * term) * spiky_gradient(k, diff, r)
}

/// Viscous force on `i` from `j`, pulling `v_i` towards `v_j`.
#[inline]
pub fn viscosity_pair(
    k: &KernelConstants,
    config: &SphConfig,
    r2: f32,
    (velocity_i, density_i): (Vec3, f32),
    (velocity_j, density_j): (Vec3, f32),
) -> Vec3 {
    if r2 >= k.h2 {
        return Vec3::ZERO;
    }
    let r = r2.sqrt();
    let rho_i = density_i.max(DENSITY_EPSILON);
    let rho_j = density_j.max(DENSITY_EPSILON);

    let weight = config.viscosity_mu * config.mass * (2.0 / (rho_i + rho_j));
    weight * (velocity_j - velocity_i) * viscosity_laplacian(k, r)
}

// ============================ neighbor search ============================

/// Read-only view of the built grid used to walk a particle's 27 cells.
#[derive(Clone, Copy)]
pub struct Neighborhood<'a> {
    pub grid: &'a GridParams,
    pub cells: &'a CellBuffers,
    pub position: &'a [Vec3],
    pub policy: NeighborPolicy,
}

impl<'a> Neighborhood<'a> {
    /// Calls `visit(j, p_i - p_j, |p_i - p_j|^2)` for every candidate `j != i`
    /// in the neighboring cells. Distances are not filtered here.
    #[inline]
    pub fn for_each(&self, i: usize, mut visit: impl FnMut(usize, Vec3, f32)) {
        let p_i = self.position[i];
        let center = self.grid.cell_coord(p_i);

        self.grid.for_each_neighbor_cell(center, self.policy, |cell| {
            for j in self.cells.cell_range(cell) {
                if j == i {
                    continue;
                }
                let diff = p_i - self.position[j];
                visit(j, diff, diff.length_squared());
            }
        });
    }
}

// ============================ stages =====================================

pub fn compute_density<D: ComputeDevice>(
    device: &D,
    config: &SphConfig,
    k: &KernelConstants,
    hood: &Neighborhood,
    density: &mut [f32],
) -> Result<(), DeviceError> {
    let self_term = self_density(k, config.mass);

    device.dispatch_map("compute_density", density, |i| {
        let mut rho = 0.0;
        hood.for_each(i, |_, _, r2| {
            rho += config.mass * poly6(k, r2);
        });
        rho + self_term
    })
}

pub fn compute_pressure<D: ComputeDevice>(
    device: &D,
    config: &SphConfig,
    density: &[f32],
    pressure: &mut [f32],
) -> Result<(), DeviceError> {
    device.dispatch_map("compute_pressure", pressure, |i| {
        equation_of_state(density[i], config.rest_density, config.pressure_stiffness)
    })
}

pub fn compute_pressure_force<D: ComputeDevice>(
    device: &D,
    config: &SphConfig,
    k: &KernelConstants,
    hood: &Neighborhood,
    (density, pressure): (&[f32], &[f32]),
    pressure_force: &mut [Vec3],
) -> Result<(), DeviceError> {
    device.dispatch_map("compute_pressure_force", pressure_force, |i| {
        let own = (pressure[i], density[i]);
        let mut force = Vec3::ZERO;
        hood.for_each(i, |j, diff, r2| {
            force += pressure_force_pair(k, config.mass, diff, r2, own, (pressure[j], density[j]));
        });
        force
    })
}

pub fn compute_viscosity<D: ComputeDevice>(
    device: &D,
    config: &SphConfig,
    k: &KernelConstants,
    hood: &Neighborhood,
    (density, velocity): (&[f32], &[Vec3]),
    viscosity_force: &mut [Vec3],
) -> Result<(), DeviceError> {
    device.dispatch_map("compute_viscosity", viscosity_force, |i| {
        let own = (velocity[i], density[i]);
        let mut force = Vec3::ZERO;
        hood.for_each(i, |j, _, r2| {
            force += viscosity_pair(k, config, r2, own, (velocity[j], density[j]));
        });
        force
    })
}
