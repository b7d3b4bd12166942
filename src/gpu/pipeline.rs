use std::borrow::Cow;

use bevy::prelude::*;
use bevy::render::graph::CameraDriverLabel;
use bevy::render::render_graph::{
    Node, NodeRunError, RenderGraph, RenderGraphContext, RenderLabel,
};
use bevy::render::render_resource::{
    BindGroupLayout, CachedComputePipelineId, CachedPipelineState, ComputePassDescriptor,
    ComputePipelineDescriptor, PipelineCache, PushConstantRange, ShaderDefVal,
};
use bevy::render::renderer::{RenderContext, RenderDevice};

use crate::gpu::buffers::{GpuSphBuffers, SphBindGroups};
use crate::gpu::grid_build::SphBinding::{
    CellCounts, CellStartIndices, Densities, Params, Positions, PressureForces, Pressures,
    Velocities, ViscosityForces,
};
use crate::gpu::grid_build::{GRID_PASSES, Lanes, SphPass};
use crate::gpu::readback::{SphReadback, SphStepState};

pub const SHADER_ASSET_PATH: &str = "shaders/sph_solver.wgsl";

/// density -> pressure -> pressure force -> viscosity -> integrate
pub const FORCE_PASSES: [SphPass; 5] = [
    SphPass {
        label: "sph_compute_density",
        entry_point: "compute_density",
        lanes: Lanes::Particles,
        bindings: &[Params, Positions, Densities, CellCounts, CellStartIndices],
    },
    SphPass {
        label: "sph_compute_pressure",
        entry_point: "compute_pressure",
        lanes: Lanes::Particles,
        bindings: &[Params, Densities, Pressures],
    },
    SphPass {
        label: "sph_compute_pressure_force",
        entry_point: "compute_pressure_force",
        lanes: Lanes::Particles,
        bindings: &[
            Params,
            Positions,
            Densities,
            Pressures,
            PressureForces,
            CellCounts,
            CellStartIndices,
        ],
    },
    SphPass {
        label: "sph_compute_viscosity",
        entry_point: "compute_viscosity",
        lanes: Lanes::Particles,
        bindings: &[
            Params,
            Positions,
            Velocities,
            Densities,
            ViscosityForces,
            CellCounts,
            CellStartIndices,
        ],
    },
    SphPass {
        label: "sph_integrate",
        entry_point: "integrate",
        lanes: Lanes::Particles,
        bindings: &[Params, Positions, Velocities, PressureForces, ViscosityForces],
    },
];

/// All ten passes in dispatch order.
pub fn sph_passes() -> impl Iterator<Item = &'static SphPass> {
    GRID_PASSES.iter().chain(FORCE_PASSES.iter())
}

/// Layouts and queued pipelines, indexed like `sph_passes()`.
#[derive(Resource)]
pub struct SphPipelines {
    pub layouts: Vec<BindGroupLayout>,
    pub ids: Vec<CachedComputePipelineId>,
}

impl FromWorld for SphPipelines {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();
        let layouts: Vec<BindGroupLayout> = sph_passes()
            .map(|pass| pass.bind_group_layout(render_device))
            .collect();

        let shader: Handle<Shader> = world.load_asset(SHADER_ASSET_PATH);
        let pipeline_cache = world.resource::<PipelineCache>();

        let ids = sph_passes()
            .zip(&layouts)
            .map(|(pass, layout)| {
                pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
                    label: Some(pass.label.into()),
                    layout: vec![layout.clone()],
                    push_constant_ranges: Vec::<PushConstantRange>::new(),
                    shader: shader.clone(),
                    shader_defs: Vec::<ShaderDefVal>::new(),
                    entry_point: Cow::from(pass.entry_point),
                    zero_initialize_workgroup_memory: false,
                })
            })
            .collect();

        Self { layouts, ids }
    }
}

/// Logs the first pipeline that failed to compile. The node never dispatches
/// a partial step, so a broken pass stops the whole simulation.
pub fn report_pipeline_errors(
    pipelines: Option<Res<SphPipelines>>,
    pipeline_cache: Res<PipelineCache>,
    mut reported: Local<bool>,
) {
    let Some(pipelines) = pipelines else {
        return;
    };
    if *reported {
        return;
    }

    for (pass, id) in sph_passes().zip(&pipelines.ids) {
        if let CachedPipelineState::Err(err) = pipeline_cache.get_compute_pipeline_state(*id) {
            error!("sph pass `{}` failed to compile: {err}", pass.entry_point);
            *reported = true;
            return;
        }
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct SphComputeLabel;

#[derive(Default)]
pub struct SphComputeNode;

impl Node for SphComputeNode {
    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let Some(buffers) = world.get_resource::<GpuSphBuffers>() else {
            return Ok(());
        };

        // `advance_sph_steps` already checked buffers, bind groups and pipelines
        if world.get_resource::<SphStepState>().is_some_and(|state| state.dispatch) {
            dispatch_step(world, buffers, render_context);
        }

        if let Some(readback) = world.get_resource::<SphReadback>() {
            if readback.copy && readback.particle_count == buffers.particle_count {
                let bytes = SphReadback::section_len(buffers.particle_count);
                let encoder = render_context.command_encoder();
                let target = &readback.buffer;
                encoder.copy_buffer_to_buffer(&buffers.positions, 0, target, 0, bytes);
                encoder.copy_buffer_to_buffer(&buffers.velocities, 0, target, bytes, bytes);
            }
        }

        Ok(())
    }
}

// All ten passes or none.
fn dispatch_step(world: &World, buffers: &GpuSphBuffers, render_context: &mut RenderContext) {
    let (Some(pipelines), Some(bind_groups)) =
        (world.get_resource::<SphPipelines>(), world.get_resource::<SphBindGroups>())
    else {
        return;
    };
    if bind_groups.generation != buffers.generation {
        return;
    }

    let pipeline_cache = world.resource::<PipelineCache>();
    let mut compiled = Vec::with_capacity(pipelines.ids.len());
    for id in &pipelines.ids {
        let Some(pipeline) = pipeline_cache.get_compute_pipeline(*id) else {
            return;
        };
        compiled.push(pipeline);
    }

    let encoder = render_context.command_encoder();
    // one compute pass per stage is the barrier between stages
    for ((pass, pipeline), bind_group) in sph_passes().zip(compiled).zip(&bind_groups.groups) {
        let mut compute = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some(pass.label),
            timestamp_writes: None,
        });
        compute.set_pipeline(pipeline);
        compute.set_bind_group(0, bind_group, &[]);
        compute.dispatch_workgroups(buffers.workgroups(pass), 1, 1);
    }
}

pub fn add_sph_node_to_graph(render_app: &mut bevy::app::SubApp) {
    let mut graph = render_app.world_mut().resource_mut::<RenderGraph>();
    graph.add_node(SphComputeLabel, SphComputeNode);
    graph.add_node_edge(SphComputeLabel, CameraDriverLabel);
}
