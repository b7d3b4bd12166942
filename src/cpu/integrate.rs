use glam::Vec3;

use crate::config::{BOUNDARY_INSET, BoxExtents, MASS_EPSILON, SphConfig};
use crate::cpu::buffers::ParticleBuffers;
use crate::cpu::device::ComputeDevice;
use crate::error::DeviceError;

/// Semi-implicit Euler followed by the wall response.
///
/// Walls are handled one axis at a time (x, y, z) against the already
/// corrected position, so a corner hit is resolved on both axes in the same step.
#[inline]
pub fn integrate_particle(
    position: &mut Vec3,
    velocity: &mut Vec3,
    force: Vec3,
    config: &SphConfig,
    half: Vec3,
) {
    let accel = force / config.mass.max(MASS_EPSILON) + config.gravity;
    *velocity += accel * config.delta;
    *position += *velocity * config.delta;

    let damping = -(1.0 - config.restitution);
    for axis in 0..3 {
        let limit = half[axis];
        if position[axis].abs() > limit {
            position[axis] = (limit - BOUNDARY_INSET).max(0.0) * position[axis].signum();
            velocity[axis] *= damping;
        }
    }
}

pub fn integrate<D: ComputeDevice>(
    device: &D,
    config: &SphConfig,
    extents: &BoxExtents,
    particles: &mut ParticleBuffers,
) -> Result<(), DeviceError> {
    let half = extents.half();
    let ParticleBuffers {
        position,
        velocity,
        pressure_force,
        viscosity_force,
        ..
    } = particles;

    device.dispatch_update("integrate", position, velocity, |i, p, v| {
        integrate_particle(p, v, pressure_force[i] + viscosity_force[i], config, half);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn still() -> SphConfig {
        SphConfig {
            gravity: Vec3::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn free_fall_is_semi_implicit() {
        let config = SphConfig::default();
        let (mut p, mut v) = (Vec3::ZERO, Vec3::ZERO);
        integrate_particle(&mut p, &mut v, Vec3::ZERO, &config, Vec3::splat(10.0));
        assert!((v.y - config.gravity.y * config.delta).abs() < 1e-7);
        // position uses the updated velocity
        assert!((p.y - v.y * config.delta).abs() < 1e-9);
    }

    #[test]
    fn wall_hit_clamps_and_reflects() {
        let config = still();
        let half = Vec3::new(1.0, 1.0, 1.0);
        let mut p = Vec3::new(1.0 + 1e-3, 0.0, 0.0);
        let mut v = Vec3::new(2.0, 0.0, 0.0);
        integrate_particle(&mut p, &mut v, Vec3::ZERO, &config, half);

        assert!((p.x - (1.0 - BOUNDARY_INSET)).abs() < 1e-6);
        assert!((v.x + 2.0 * (1.0 - config.restitution)).abs() < 1e-6);
    }

    #[test]
    fn corner_resolves_every_axis() {
        let config = still();
        let half = Vec3::new(1.0, 0.5, 2.0);
        let mut p = Vec3::new(-1.2, -0.7, 2.5);
        let mut v = Vec3::new(-1.0, -1.0, 1.0);
        integrate_particle(&mut p, &mut v, Vec3::ZERO, &config, half);

        assert!(p.abs().cmple(half).all());
        assert!(v.x > 0.0 && v.y > 0.0 && v.z < 0.0);
    }

    #[test]
    fn full_restitution_stops_the_wall_normal() {
        let config = SphConfig {
            restitution: 1.0,
            ..still()
        };
        let mut p = Vec3::new(0.0, 3.0, 0.0);
        let mut v = Vec3::new(0.5, 4.0, 0.0);
        integrate_particle(&mut p, &mut v, Vec3::ZERO, &config, Vec3::ONE);
        assert_eq!(v.y, 0.0);
        assert_eq!(v.x, 0.5);
    }
}
