// brute-force SPH (no grid, no reordering), kept as a test oracle for small N
use glam::Vec3;

use crate::config::{BoxExtents, KernelConstants, SphConfig};
use crate::cpu::integrate::integrate_particle;
use crate::cpu::kernels::{
    equation_of_state, poly6, pressure_force_pair, self_density, viscosity_pair,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    pub pos: Vec3, // position
    pub vel: Vec3, // velocity
    pub rho: f32,  // density
    pub p: f32,    // pressure
    pub f_pressure: Vec3,
    pub f_viscosity: Vec3,
}

impl Particle {
    pub fn new(pos: Vec3, vel: Vec3) -> Self {
        Self {
            pos,
            vel,
            rho: 0.0,
            p: 0.0,
            f_pressure: Vec3::ZERO,
            f_viscosity: Vec3::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReferenceState {
    pub config: SphConfig,
    pub kernels: KernelConstants,
    pub extents: BoxExtents,
    pub particles: Vec<Particle>,
}

impl ReferenceState {
    pub fn new(
        config: SphConfig,
        extents: BoxExtents,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> Self {
        let particles = positions
            .iter()
            .zip(velocities)
            .map(|(&pos, &vel)| Particle::new(pos, vel))
            .collect();

        Self {
            kernels: config.kernels(),
            config,
            extents,
            particles,
        }
    }

    pub fn density_pressure_calc(&mut self) {
        let k = &self.kernels;
        let m = self.config.mass;

        let rho_vec: Vec<f32> = (0..self.particles.len())
            .map(|i| {
                let pos_i = self.particles[i].pos;
                let mut rho = 0.0;
                for (j, other) in self.particles.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    rho += m * poly6(k, (pos_i - other.pos).length_squared());
                }
                rho + self_density(k, m)
            })
            .collect();

        for (particle, rho) in self.particles.iter_mut().zip(rho_vec) {
            particle.rho = rho;
            particle.p =
                equation_of_state(rho, self.config.rest_density, self.config.pressure_stiffness);
        }
    }

    pub fn force_calc(&mut self) {
        let k = &self.kernels;
        let mut forces = vec![(Vec3::ZERO, Vec3::ZERO); self.particles.len()];

        for (i, particle_i) in self.particles.iter().enumerate() {
            for (j, particle_j) in self.particles.iter().enumerate() {
                if i == j {
                    continue;
                }
                let r = particle_i.pos - particle_j.pos;
                let r2 = r.length_squared();

                forces[i].0 += pressure_force_pair(
                    k,
                    self.config.mass,
                    r,
                    r2,
                    (particle_i.p, particle_i.rho),
                    (particle_j.p, particle_j.rho),
                );
                forces[i].1 += viscosity_pair(
                    k,
                    &self.config,
                    r2,
                    (particle_i.vel, particle_i.rho),
                    (particle_j.vel, particle_j.rho),
                );
            }
        }

        for (particle, (f_pressure, f_viscosity)) in self.particles.iter_mut().zip(forces) {
            particle.f_pressure = f_pressure;
            particle.f_viscosity = f_viscosity;
        }
    }

    pub fn integrate(&mut self) {
        let half = self.extents.half();
        for p in &mut self.particles {
            let force = p.f_pressure + p.f_viscosity;
            integrate_particle(&mut p.pos, &mut p.vel, force, &self.config, half);
        }
    }

    pub fn step(&mut self) {
        self.density_pressure_calc();
        self.force_calc();
        self.integrate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_particle_only_has_its_self_density() {
        let config = SphConfig::default();
        let mut state =
            ReferenceState::new(config, BoxExtents::default(), &[Vec3::ZERO], &[Vec3::ZERO]);
        state.density_pressure_calc();

        let expected = self_density(&config.kernels(), config.mass);
        assert_eq!(state.particles[0].rho, expected);
        assert_eq!(state.particles[0].p, 0.0);

        state.force_calc();
        assert_eq!(state.particles[0].f_pressure, Vec3::ZERO);
    }

    #[test]
    fn crowded_pair_pushes_apart() {
        let config = SphConfig {
            gravity: Vec3::ZERO,
            mass: 1.0,
            ..Default::default()
        };
        let positions = [Vec3::ZERO, Vec3::new(0.2, 0.0, 0.0)];
        let mut state =
            ReferenceState::new(config, BoxExtents::default(), &positions, &[Vec3::ZERO; 2]);
        state.step();

        assert!(state.particles[0].pos.x < 0.0);
        assert!(state.particles[1].pos.x > 0.2);
    }
}
