//! Simulation constants and the box the fluid lives in.
//!
//! Defaults are tuned for a 32 x 16 x 16 box with a unit smoothing radius,
//! roughly 10k particles at 60 Hz.

use std::f32::consts::PI;

use bevy::prelude::Resource;
use glam::Vec3;

use crate::error::ConfigError;

pub const GRAVITY: Vec3 = Vec3::new(0.0, -9.8, 0.0);

/// Floor applied to densities wherever they are divided by.
pub const DENSITY_EPSILON: f32 = 1e-8;
/// Floor applied to the particle mass before inverting it.
pub const MASS_EPSILON: f32 = 1e-8;
/// Pairs closer than this get no pressure force (direction undefined).
pub const MIN_SEPARATION: f32 = 1e-3;
/// How far inside the wall a colliding particle is put back.
pub const BOUNDARY_INSET: f32 = 1e-2;

pub const DEFAULT_PARTICLE_COUNT: usize = 10_000;

/// How the 27-cell neighborhood treats cells past the grid edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NeighborPolicy {
    /// Clamp each axis into the grid. Edge cells get visited more than once,
    /// which acts as extra density from the walls.
    #[default]
    Clamp,
    /// Drop out-of-range cells, every neighbor is counted exactly once.
    Skip,
}

/// Which exclusive scan builds the cell start offsets. Both give identical offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrefixScan {
    /// One lane walks every cell.
    #[default]
    Sequential,
    /// Block-local scans, a scan over block sums, then an add-back pass.
    Blocked { block_size: usize },
}

#[derive(Resource, Clone, Copy, Debug, PartialEq)]
pub struct SphConfig {
    pub mass: f32,
    pub rest_density: f32,
    /// Equation-of-state gain.
    pub pressure_stiffness: f32,
    /// Smoothing radius `h`, also the grid cell size.
    pub smoothing_radius: f32,
    pub viscosity_mu: f32,
    /// Fixed timestep.
    pub delta: f32,
    /// 0 keeps the full bounce, 1 kills the wall-normal velocity.
    pub restitution: f32,
    /// Only meaningful to renderers (speed colouring).
    pub max_speed: f32,
    pub gravity: Vec3,
    pub neighbor_policy: NeighborPolicy,
    pub prefix_scan: PrefixScan,
}

impl Default for SphConfig {
    fn default() -> Self {
        Self {
            mass: 0.2,
            rest_density: 0.8,
            pressure_stiffness: 100.0,
            smoothing_radius: 1.0,
            viscosity_mu: 0.12,
            delta: 1.0 / 60.0,
            restitution: 0.1,
            max_speed: 15.0,
            gravity: GRAVITY,
            neighbor_policy: NeighborPolicy::Clamp,
            prefix_scan: PrefixScan::Sequential,
        }
    }
}

impl SphConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let h = self.smoothing_radius;
        if !(h.is_finite() && h > 0.0) {
            return Err(ConfigError::SmoothingRadius(h));
        }

        let positive = [("mass", self.mass), ("delta", self.delta)];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Parameter { name, value });
            }
        }

        let non_negative = [
            ("rest_density", self.rest_density),
            ("pressure_stiffness", self.pressure_stiffness),
            ("viscosity_mu", self.viscosity_mu),
            ("max_speed", self.max_speed),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Parameter { name, value });
            }
        }

        if !(0.0..=1.0).contains(&self.restitution) {
            return Err(ConfigError::Parameter {
                name: "restitution",
                value: self.restitution,
            });
        }

        if !self.gravity.is_finite() {
            return Err(ConfigError::Parameter {
                name: "gravity",
                value: self.gravity.length(),
            });
        }

        if let PrefixScan::Blocked { block_size } = self.prefix_scan {
            if block_size == 0 {
                return Err(ConfigError::Parameter {
                    name: "prefix_scan.block_size",
                    value: 0.0,
                });
            }
        }

        Ok(())
    }

    pub fn kernels(&self) -> KernelConstants {
        KernelConstants::new(self.smoothing_radius)
    }
}

/// Powers of `h` and the kernel normalization constants derived from it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelConstants {
    pub h: f32,
    pub h2: f32,
    pub h3: f32,
    pub h6: f32,
    pub h9: f32,
    /// 315 / (64 pi h^9)
    pub poly6: f32,
    /// -45 / (pi h^6), gradient of the Spiky kernel
    pub spiky: f32,
    /// 45 / (pi h^6), Laplacian of the viscosity kernel
    pub viscosity: f32,
}

impl KernelConstants {
    pub fn new(h: f32) -> Self {
        let h2 = h * h;
        let h3 = h2 * h;
        let h6 = h3 * h3;
        let h9 = h6 * h3;

        Self {
            h,
            h2,
            h3,
            h6,
            h9,
            poly6: 315.0 / (64.0 * PI * h9),
            spiky: -45.0 / (PI * h6),
            viscosity: 45.0 / (PI * h6),
        }
    }
}

/// Full size of the simulation box, centred on the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxExtents {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

impl Default for BoxExtents {
    fn default() -> Self {
        Self::new(32.0, 16.0, 16.0)
    }
}

impl BoxExtents {
    pub const fn new(width: f32, height: f32, depth: f32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.width, self.height, self.depth)
    }

    pub fn half(&self) -> Vec3 {
        self.as_vec3() * 0.5
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, value) in [('x', self.width), ('y', self.height), ('z', self.depth)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::BoxExtent { axis, value });
            }
        }
        Ok(())
    }

    /// True when `p` lies inside the box, walls excluded.
    pub fn strictly_contains(&self, p: Vec3) -> bool {
        p.abs().cmplt(self.half()).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_radius_kernels() {
        let k = KernelConstants::new(1.0);
        assert_eq!(k.h9, 1.0);
        assert!((k.poly6 - 315.0 / (64.0 * PI)).abs() < 1e-6);
        assert!(k.spiky < 0.0);
        assert_eq!(k.spiky, -k.viscosity);
    }

    #[test]
    fn kernel_powers_of_half_radius() {
        let k = KernelConstants::new(0.5);
        assert_eq!(k.h2, 0.25);
        assert_eq!(k.h3, 0.125);
        assert!((k.h6 - 0.015625).abs() < 1e-9);
    }

    #[test]
    fn defaults_are_valid() {
        assert!(SphConfig::default().validate().is_ok());
        assert!(BoxExtents::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_parameters() {
        let cfg = SphConfig {
            smoothing_radius: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::SmoothingRadius(0.0)));

        let cfg = SphConfig {
            restitution: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Parameter { name: "restitution", .. })
        ));

        let cfg = SphConfig {
            mass: f32::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let extents = BoxExtents::new(10.0, -1.0, 10.0);
        assert_eq!(
            extents.validate(),
            Err(ConfigError::BoxExtent { axis: 'y', value: -1.0 })
        );
    }

    #[test]
    fn strict_containment_excludes_walls() {
        let b = BoxExtents::new(2.0, 2.0, 2.0);
        assert!(b.strictly_contains(Vec3::new(0.99, -0.99, 0.0)));
        assert!(!b.strictly_contains(Vec3::new(1.0, 0.0, 0.0)));
    }
}
