//! Grid-accelerated SPH fluid for Bevy.
//!
//! `cpu` holds the solver proper (device-agnostic stages over plain arrays),
//! `gpu` runs the same ten stages as WGSL compute passes in the render graph.

pub mod config;
pub mod error;
pub mod plugin;

pub mod cpu {
    pub mod device;
    pub mod buffers;
    pub mod grid;
    pub mod grid_build;
    pub mod kernels;
    pub mod integrate;
    pub mod solver;
    pub mod reference;
}

pub mod gpu {
    pub mod ffi;
    pub mod buffers;
    pub mod grid_build;
    pub mod pipeline;
    pub mod readback;
}

pub use config::{BoxExtents, NeighborPolicy, PrefixScan, SphConfig};
pub use cpu::device::{ComputeDevice, ParallelDevice, SerialDevice};
pub use cpu::solver::FluidSolver;
pub use error::{ConfigError, DeviceError, SimError};
pub use gpu::buffers::GpuSphPlugin;
pub use plugin::{CpuFluidPlugin, SimulationControls, SimulationStatus};
