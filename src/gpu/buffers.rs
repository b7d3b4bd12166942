use bevy::prelude::*;
use bevy::render::extract_resource::{ExtractResource, ExtractResourcePlugin};
use bevy::render::render_resource::{
    BindGroup, Buffer, BufferDescriptor, BufferInitDescriptor, BufferUsages, WgpuLimits,
};
use bevy::render::renderer::RenderDevice;
use bevy::render::{Render, RenderApp, RenderSet};

use crate::config::{BoxExtents, SphConfig};
use crate::cpu::grid::GridParams;
use crate::cpu::solver::seed_position;
use crate::error::{ConfigError, DeviceError, SimError};
use crate::gpu::ffi::{GpuSimParams, GpuVec4};
use crate::gpu::grid_build::SphPass;
use crate::gpu::pipeline::{SphPipelines, add_sph_node_to_graph, report_pipeline_errors, sph_passes};
use crate::gpu::readback::{SphReadback, SphStepLimit, SphStepState, advance_sph_steps};
use crate::plugin::SimulationControls;

// ==================== resources ======================================

/// What the render world should simulate. A new `generation` means every
/// GPU buffer is thrown away and reseeded.
#[derive(Resource, Clone, Debug, PartialEq, ExtractResource)]
pub struct GpuSimulationSettings {
    pub config: SphConfig,
    pub extents: BoxExtents,
    pub particle_count: u32,
    pub generation: u64,
}

impl Default for GpuSimulationSettings {
    fn default() -> Self {
        let controls = SimulationControls::default();
        Self {
            config: SphConfig::default(),
            extents: controls.box_extents,
            particle_count: controls.particle_count as u32,
            generation: 0,
        }
    }
}

impl GpuSimulationSettings {
    /// Checks the same things the CPU solver checks before a reinit.
    pub fn validate(&self) -> Result<GridParams, SimError> {
        if self.particle_count == 0 {
            return Err(ConfigError::ParticleCount(0).into());
        }
        self.config.validate()?;
        Ok(GridParams::new(self.extents, self.config.smoothing_radius)?)
    }
}

/// Every storage buffer of one generation plus the uniform block.
#[derive(Resource)]
pub struct GpuSphBuffers {
    pub generation: u64,
    pub particle_count: u32,
    pub total_cells: u32,
    pub params: Buffer,
    // read by renderers, vec4 per particle
    pub positions: Buffer,
    pub velocities: Buffer,
    pub densities: Buffer,
    pub pressures: Buffer,
    pub pressure_forces: Buffer,
    pub viscosity_forces: Buffer,
    pub reordered_positions: Buffer,
    pub reordered_velocities: Buffer,
    pub cell_index_of_particle: Buffer,
    pub cell_counts: Buffer,
    pub cell_start_indices: Buffer,
    pub scatter_offsets: Buffer,
}

/// One bind group per pass, in dispatch order.
#[derive(Resource)]
pub struct SphBindGroups {
    pub generation: u64,
    pub groups: Vec<BindGroup>,
}

// =====================================================================

// ========================== systems ==================================

// App world

fn update_gpu_settings(
    config: Res<SphConfig>,
    controls: Res<SimulationControls>,
    render_device: Option<Res<RenderDevice>>,
    mut settings: ResMut<GpuSimulationSettings>,
) {
    if !(config.is_changed() || controls.is_changed()) {
        return;
    }

    let next = GpuSimulationSettings {
        config: *config,
        extents: controls.box_extents,
        particle_count: u32::try_from(controls.particle_count).unwrap_or(0),
        generation: settings.generation + 1,
    };
    let same = next.config == settings.config
        && next.extents == settings.extents
        && next.particle_count == settings.particle_count;
    if same {
        return;
    }

    let checked = next.validate().and_then(|grid| match &render_device {
        Some(device) => {
            check_buffer_limits(next.particle_count, grid.total_cell_count, &device.limits())?;
            Ok(grid)
        }
        None => Ok(grid),
    });

    match checked {
        Ok(grid) => {
            info!(
                "gpu sph generation {}: {} particles, {} cells",
                next.generation, next.particle_count, grid.total_cell_count
            );
            *settings = next;
        }
        Err(err) => warn!("rejected gpu simulation change: {err}"),
    }
}

// Render world

fn prepare_sph_buffers(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    settings: Option<Res<GpuSimulationSettings>>,
    buffers: Option<Res<GpuSphBuffers>>,
    mut failed_generation: Local<Option<u64>>,
) {
    let Some(settings) = settings else {
        return; // not extracted yet
    };
    if buffers.is_some_and(|b| b.generation == settings.generation) {
        return;
    }
    if *failed_generation == Some(settings.generation) {
        return;
    }

    // on failure the previous generation, if any, keeps running
    match GpuSphBuffers::new(&render_device, &settings) {
        Ok(buffers) => commands.insert_resource(buffers),
        Err(err) => {
            error!("gpu sph generation {} not created: {err}", settings.generation);
            *failed_generation = Some(settings.generation);
        }
    }
}

fn prepare_sph_bind_groups(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipelines: Option<Res<SphPipelines>>,
    buffers: Option<Res<GpuSphBuffers>>,
    bind_groups: Option<Res<SphBindGroups>>,
) {
    let (Some(pipelines), Some(buffers)) = (pipelines, buffers) else {
        return;
    };
    if bind_groups.is_some_and(|g| g.generation == buffers.generation) {
        return;
    }

    let groups = sph_passes()
        .zip(&pipelines.layouts)
        .map(|(pass, layout)| pass.bind_group(&render_device, layout, &buffers))
        .collect();

    commands.insert_resource(SphBindGroups {
        generation: buffers.generation,
        groups,
    });
}

// Implementations

/// Rejects a generation whose largest buffers cannot be bound on this device.
pub fn check_buffer_limits(
    particle_count: u32,
    total_cells: usize,
    limits: &WgpuLimits,
) -> Result<(), DeviceError> {
    let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
    let n = particle_count as u64;
    let largest = [
        ("sph_positions", n * size_of::<GpuVec4>() as u64),
        ("sph_densities", n * size_of::<f32>() as u64),
        ("sph_cell_counts", total_cells as u64 * size_of::<u32>() as u64),
    ];

    for (what, bytes) in largest {
        if bytes > limit {
            return Err(DeviceError::BufferLimit { what, bytes, limit });
        }
    }
    Ok(())
}

fn storage_buffer(render_device: &RenderDevice, label: &'static str, size: u64) -> Buffer {
    render_device.create_buffer(&BufferDescriptor {
        label: Some(label),
        // zero-sized bindings are invalid
        size: size.max(16),
        usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

impl GpuSphBuffers {
    pub fn new(
        render_device: &RenderDevice,
        settings: &GpuSimulationSettings,
    ) -> Result<Self, SimError> {
        let grid = settings.validate()?;
        let n = settings.particle_count as usize;
        let cells = grid.total_cell_count;
        check_buffer_limits(settings.particle_count, cells, &render_device.limits())?;

        let params =
            GpuSimParams::new(&settings.config, &settings.extents, &grid, settings.particle_count);
        let params = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("sph_params"),
            contents: bytemuck::bytes_of(&params),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        // same seed as the CPU solver
        let seeded: Vec<GpuVec4> = (0..n)
            .map(|i| GpuVec4::from_vec3(seed_position(i, &settings.extents), 1.0))
            .collect();
        let positions = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("sph_positions"),
            contents: bytemuck::cast_slice(&seeded),
            usage: BufferUsages::STORAGE
                | BufferUsages::COPY_SRC
                | BufferUsages::COPY_DST
                | BufferUsages::VERTEX,
        });

        let vec4_bytes = (n * size_of::<GpuVec4>()) as u64;
        let scalar_bytes = (n * size_of::<f32>()) as u64;
        let cell_bytes = (cells * size_of::<u32>()) as u64;

        Ok(Self {
            generation: settings.generation,
            particle_count: settings.particle_count,
            total_cells: cells as u32,
            params,
            positions,
            velocities: storage_buffer(render_device, "sph_velocities", vec4_bytes),
            densities: storage_buffer(render_device, "sph_densities", scalar_bytes),
            pressures: storage_buffer(render_device, "sph_pressures", scalar_bytes),
            pressure_forces: storage_buffer(render_device, "sph_pressure_forces", vec4_bytes),
            viscosity_forces: storage_buffer(render_device, "sph_viscosity_forces", vec4_bytes),
            reordered_positions:
                storage_buffer(render_device, "sph_reordered_positions", vec4_bytes),
            reordered_velocities:
                storage_buffer(render_device, "sph_reordered_velocities", vec4_bytes),
            cell_index_of_particle:
                storage_buffer(render_device, "sph_cell_index_of_particle", scalar_bytes),
            cell_counts: storage_buffer(render_device, "sph_cell_counts", cell_bytes),
            cell_start_indices: storage_buffer(render_device, "sph_cell_start_indices", cell_bytes),
            scatter_offsets: storage_buffer(render_device, "sph_scatter_offsets", cell_bytes),
        })
    }

    /// Workgroups `pass` needs for this generation.
    pub fn workgroups(&self, pass: &SphPass) -> u32 {
        pass.workgroups(self.particle_count, self.total_cells)
    }
}

// =====================================================================

// Plugin

/// Runs the SPH solver as compute passes ahead of the camera.
/// Renderers read `GpuSphBuffers::positions` / `velocities` in the render world.
pub struct GpuSphPlugin;

impl Plugin for GpuSphPlugin {
    fn build(&self, app: &mut App) {
        // App
        app.init_resource::<SphConfig>()
            .init_resource::<SimulationControls>()
            .init_resource::<GpuSimulationSettings>()
            .init_resource::<SphStepLimit>()
            .add_plugins((
                ExtractResourcePlugin::<GpuSimulationSettings>::default(),
                ExtractResourcePlugin::<SphStepLimit>::default(),
                ExtractResourcePlugin::<SphReadback>::default(),
            ))
            .add_systems(PreUpdate, update_gpu_settings);

        // Render
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app.init_resource::<SphStepState>().add_systems(
            Render,
            (
                report_pipeline_errors.in_set(RenderSet::Prepare),
                prepare_sph_buffers.in_set(RenderSet::PrepareResources),
                (prepare_sph_bind_groups, advance_sph_steps)
                    .chain()
                    .in_set(RenderSet::PrepareBindGroups),
            ),
        );

        add_sph_node_to_graph(render_app);
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app.init_resource::<SphPipelines>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let grid = GpuSimulationSettings::default().validate().unwrap();
        assert_eq!(grid.total_cell_count, 32 * 16 * 16);
    }

    #[test]
    fn settings_reject_empty_runs() {
        let settings = GpuSimulationSettings {
            particle_count: 0,
            ..Default::default()
        };
        assert_eq!(
            settings.validate().unwrap_err(),
            SimError::Configuration(ConfigError::ParticleCount(0))
        );
    }

    #[test]
    fn oversized_generations_hit_the_device_limits() {
        let limits = WgpuLimits::default(); // 128 MiB bindings
        assert_eq!(check_buffer_limits(100_000, 32 * 16 * 16, &limits), Ok(()));

        // 16 bytes per particle in the vec4 arrays
        let err = check_buffer_limits(12_800_000, 32 * 16 * 16, &limits).unwrap_err();
        assert_eq!(
            err,
            DeviceError::BufferLimit {
                what: "sph_positions",
                bytes: 12_800_000 * 16,
                limit: 128 << 20,
            }
        );

        let err = check_buffer_limits(1000, 40_000_000, &limits).unwrap_err();
        assert!(matches!(err, DeviceError::BufferLimit { what: "sph_cell_counts", .. }));

        // smaller adapters are capped by their own limits
        let webgl = WgpuLimits::downlevel_webgl2_defaults();
        assert!(check_buffer_limits(100_000, 32 * 16 * 16, &webgl).is_err());
    }

    #[test]
    fn control_changes_bump_the_generation() {
        let mut app = App::new();
        app.init_resource::<SphConfig>()
            .init_resource::<SimulationControls>()
            .init_resource::<GpuSimulationSettings>()
            .add_systems(Update, update_gpu_settings);

        app.update();
        assert_eq!(app.world().resource::<GpuSimulationSettings>().generation, 0);

        app.world_mut()
            .resource_mut::<SimulationControls>()
            .box_extents = BoxExtents::new(20.0, 10.0, 10.0);
        app.update();
        let settings = app.world().resource::<GpuSimulationSettings>();
        assert_eq!(settings.generation, 1);
        assert_eq!(settings.extents.width, 20.0);

        // invalid changes are ignored
        app.world_mut().resource_mut::<SimulationControls>().particle_count = 0;
        app.update();
        assert_eq!(app.world().resource::<GpuSimulationSettings>().generation, 1);
    }
}
