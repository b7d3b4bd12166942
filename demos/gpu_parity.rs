//! Runs a few GPU steps, reads the particles back and compares them with the
//! serial CPU solver started from the same seed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bevy::app::AppExit;
use bevy::prelude::*;
use bevy::render::render_resource::{Maintain, MapMode};
use bevy::render::renderer::RenderDevice;
use bevy_sph_fluid::gpu::ffi::GpuVec4;
use bevy_sph_fluid::gpu::readback::{SphReadback, SphStepLimit};
use bevy_sph_fluid::{
    BoxExtents, FluidSolver, GpuSphPlugin, SerialDevice, SimulationControls, SphConfig,
};

const PARTICLES: usize = 8;
const STEPS: u64 = 10;
const EXTENTS: BoxExtents = BoxExtents::new(2.0, 2.0, 2.0);
// frames to wait after the last step, and again after the last copy
const SETTLE_FRAMES: u32 = 3;

const MAX_POSITION_ERROR: f32 = 1e-3;
const MAX_VELOCITY_ERROR: f32 = 1e-2;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .insert_resource(SimulationControls {
            particle_count: PARTICLES,
            box_extents: EXTENTS,
        })
        .insert_resource(SphStepLimit::steps(STEPS))
        .add_plugins(GpuSphPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, compare_after_steps)
        .run();
}

fn setup(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut exit: EventWriter<AppExit>,
) {
    commands.spawn(Camera3d::default());
    match SphReadback::new(&render_device, PARTICLES as u32) {
        Ok(readback) => commands.insert_resource(readback),
        Err(err) => {
            error!("no readback buffer: {err}");
            exit.write(AppExit::error());
        }
    }
}

fn compare_after_steps(
    limit: Res<SphStepLimit>,
    readback: Option<ResMut<SphReadback>>,
    render_device: Res<RenderDevice>,
    mut exit: EventWriter<AppExit>,
    mut state: Local<u8>,
    mut waited: Local<u32>,
) {
    let Some(mut readback) = readback else { return };

    match *state {
        // GPU still stepping
        0 => {
            if limit.reached() {
                info!("gpu finished {} steps", limit.progress());
                *state = 1;
            }
        }
        // let the last step's copy land, then stop copying
        1 => {
            *waited += 1;
            if *waited >= SETTLE_FRAMES {
                readback.copy = false;
                *waited = 0;
                *state = 2;
            }
        }
        // no copy in flight any more
        2 => {
            *waited += 1;
            if *waited >= SETTLE_FRAMES {
                let ok = map_and_compare(&readback, &render_device);
                exit.write(if ok { AppExit::Success } else { AppExit::error() });
                *state = 3;
            }
        }
        _ => {}
    }
}

fn map_and_compare(readback: &SphReadback, render_device: &RenderDevice) -> bool {
    render_device.poll(Maintain::Wait);
    let slice = readback.buffer.slice(..);

    let status = Arc::new(AtomicU8::new(0));
    let cb = status.clone();
    slice.map_async(MapMode::Read, move |r| {
        cb.store(if r.is_ok() { 1 } else { 2 }, Ordering::SeqCst)
    });

    loop {
        render_device.poll(Maintain::Poll);
        match status.load(Ordering::SeqCst) {
            0 => std::thread::yield_now(),
            1 => break,
            _ => {
                error!("readback buffer could not be mapped");
                return false;
            }
        }
    }

    let ok = {
        let data = slice.get_mapped_range();
        let (gpu_positions, gpu_velocities) = SphReadback::split(&data);
        compare_with_cpu(gpu_positions, gpu_velocities)
    };
    readback.buffer.unmap();
    ok
}

fn compare_with_cpu(gpu_positions: &[GpuVec4], gpu_velocities: &[GpuVec4]) -> bool {
    let config = SphConfig::default();
    let mut cpu = match FluidSolver::initialize(SerialDevice, PARTICLES, EXTENTS, config) {
        Ok(cpu) => cpu,
        Err(err) => {
            error!("cpu solver: {err}");
            return false;
        }
    };
    for _ in 0..STEPS {
        if let Err(err) = cpu.step() {
            error!("cpu step: {err}");
            return false;
        }
    }

    // both sides sort particles by cell, order inside a cell may differ
    let mut max_position_error: f32 = 0.0;
    let mut max_velocity_error: f32 = 0.0;
    for (p, v) in cpu.positions().iter().zip(cpu.velocities()) {
        let Some(nearest) = gpu_positions
            .iter()
            .enumerate()
            .map(|(j, g)| (j, g.xyz().distance(*p)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return false;
        };
        max_position_error = max_position_error.max(nearest.1);
        let velocity_error = gpu_velocities[nearest.0].xyz().distance(*v);
        max_velocity_error = max_velocity_error.max(velocity_error);
    }

    info!(
        "{STEPS}-step parity (GPU vs CPU): position max_abs = {:.2e} | velocity max_abs = {:.2e}",
        max_position_error, max_velocity_error
    );
    let ok = max_position_error <= MAX_POSITION_ERROR
        && max_velocity_error <= MAX_VELOCITY_ERROR;
    if !ok {
        error!("FAIL: tolerances are {MAX_POSITION_ERROR:.0e} / {MAX_VELOCITY_ERROR:.0e}");
    }
    ok
}
