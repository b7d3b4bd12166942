use thiserror::Error;

/// Invalid solver input. Fatal to the call that received it, nothing is left allocated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("particle count must be in 1..=u32::MAX, got {0}")]
    ParticleCount(usize),

    #[error("box extent along {axis} must be positive and finite, got {value}")]
    BoxExtent { axis: char, value: f32 },

    #[error("smoothing radius must be positive and finite, got {0}")]
    SmoothingRadius(f32),

    #[error("box is thinner than one cell along {axis} (extent {extent}, cell size {cell_size})")]
    EmptyGrid {
        axis: char,
        extent: f32,
        cell_size: f32,
    },

    #[error("grid of {counts:?} cells exceeds the u32 cell index range")]
    GridTooLarge { counts: [u32; 3] },

    #[error("parameter `{name}` out of range: {value}")]
    Parameter { name: &'static str, value: f32 },

    #[error("particle state has {actual} entries, the solver holds {expected}")]
    ParticleStateLength { expected: usize, actual: usize },
}

/// The compute device could not allocate or finish a stage.
/// Never retried, the caller decides whether to reinitialize.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("failed to allocate {len} elements for `{what}`")]
    Allocation { what: &'static str, len: usize },

    #[error("`{what}` needs {bytes} bytes, the device allows {limit}")]
    BufferLimit { what: &'static str, bytes: u64, limit: u64 },

    #[error("stage `{stage}` aborted: {message}")]
    LanePanicked { stage: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}
