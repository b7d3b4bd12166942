//! Host readback of the GPU particle state, and a step budget so a GPU run
//! can stop at a known step and be compared with a CPU run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use bevy::render::render_resource::{Buffer, BufferDescriptor, BufferUsages, PipelineCache};
use bevy::render::renderer::RenderDevice;

use crate::error::DeviceError;
use crate::gpu::buffers::{GpuSphBuffers, SphBindGroups};
use crate::gpu::ffi::GpuVec4;
use crate::gpu::pipeline::SphPipelines;

/// Caps the number of GPU steps per generation. `None` runs forever.
#[derive(Resource, Clone, Debug, Default, ExtractResource)]
pub struct SphStepLimit {
    pub limit: Option<u64>,
    // shared with the render world, which writes it
    progress: Arc<AtomicU64>,
}

impl SphStepLimit {
    pub fn steps(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Steps dispatched so far in the current generation.
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Acquire)
    }

    pub fn reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.progress() >= limit)
    }
}

/// Host-visible copy of the particle state: positions, then velocities.
///
/// While `copy` is set every frame ends with a copy into `buffer`. Clear it
/// and let a few frames pass before mapping.
#[derive(Resource, Clone, ExtractResource)]
pub struct SphReadback {
    pub buffer: Buffer,
    pub particle_count: u32,
    pub copy: bool,
}

impl SphReadback {
    pub fn new(render_device: &RenderDevice, particle_count: u32) -> Result<Self, DeviceError> {
        let bytes = 2 * Self::section_len(particle_count);
        let limit = render_device.limits().max_buffer_size;
        if bytes > limit {
            return Err(DeviceError::BufferLimit {
                what: "sph_readback",
                bytes,
                limit,
            });
        }

        let buffer = render_device.create_buffer(&BufferDescriptor {
            label: Some("sph_readback"),
            size: bytes.max(16),
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(Self {
            buffer,
            particle_count,
            copy: true,
        })
    }

    /// Bytes of one vec4 section.
    pub fn section_len(particle_count: u32) -> u64 {
        particle_count as u64 * size_of::<GpuVec4>() as u64
    }

    /// Splits mapped bytes into (positions, velocities).
    pub fn split(data: &[u8]) -> (&[GpuVec4], &[GpuVec4]) {
        let all: &[GpuVec4] = bytemuck::cast_slice(data);
        all.split_at(all.len() / 2)
    }
}

/// Render-world decision whether this frame runs a step.
#[derive(Resource, Debug, Default)]
pub struct SphStepState {
    pub generation: u64,
    pub steps: u64,
    pub dispatch: bool,
}

/// Decides whether the compute node steps this frame and counts the step.
/// A step only counts when every pass can be dispatched.
pub fn advance_sph_steps(
    pipelines: Option<Res<SphPipelines>>,
    pipeline_cache: Res<PipelineCache>,
    buffers: Option<Res<GpuSphBuffers>>,
    bind_groups: Option<Res<SphBindGroups>>,
    limit: Option<Res<SphStepLimit>>,
    mut state: ResMut<SphStepState>,
) {
    state.dispatch = false;
    let (Some(pipelines), Some(buffers), Some(bind_groups)) = (pipelines, buffers, bind_groups)
    else {
        return;
    };

    if state.generation != buffers.generation {
        state.generation = buffers.generation;
        state.steps = 0;
        if let Some(limit) = &limit {
            limit.progress.store(0, Ordering::Release);
        }
    }

    let ready = bind_groups.generation == buffers.generation
        && pipelines
            .ids
            .iter()
            .all(|id| pipeline_cache.get_compute_pipeline(*id).is_some());
    let budget_left = limit
        .as_ref()
        .and_then(|limit| limit.limit)
        .is_none_or(|max| state.steps < max);
    if !(ready && budget_left) {
        return;
    }

    state.dispatch = true;
    state.steps += 1;
    if let Some(limit) = &limit {
        limit.progress.store(state.steps, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_limit_shares_progress_with_its_clones() {
        let limit = SphStepLimit::steps(3);
        let extracted = limit.clone();
        assert!(!limit.reached());

        extracted.progress.store(3, Ordering::Release);
        assert_eq!(limit.progress(), 3);
        assert!(limit.reached());
        assert!(!SphStepLimit::default().reached());
    }

    #[test]
    fn split_separates_positions_from_velocities() {
        let sections = [
            GpuVec4([1.0, 2.0, 3.0, 1.0]),
            GpuVec4([4.0, 5.0, 6.0, 1.0]),
            GpuVec4([0.5, 0.0, 0.0, 0.0]),
            GpuVec4([0.0, -0.5, 0.0, 0.0]),
        ];
        let (positions, velocities) = SphReadback::split(bytemuck::cast_slice(&sections));
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[1].xyz(), glam::Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(velocities[1].xyz(), glam::Vec3::new(0.0, -0.5, 0.0));
        assert_eq!(SphReadback::section_len(2), 32);
    }
}
