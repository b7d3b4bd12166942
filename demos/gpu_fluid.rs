use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_sph_fluid::gpu::buffers::GpuSimulationSettings;
use bevy_sph_fluid::{GpuSphPlugin, SimulationControls};

fn main() {
    App::new()
        .add_plugins((DefaultPlugins, FrameTimeDiagnosticsPlugin::default()))
        .insert_resource(SimulationControls {
            particle_count: 100_000,
            ..Default::default()
        })
        .add_plugins(GpuSphPlugin)
        .add_systems(Startup, |mut commands: Commands| {
            commands.spawn((
                Camera3d::default(),
                Transform::from_xyz(0.0, 18.0, 42.0).looking_at(Vec3::ZERO, Vec3::Y),
            ));
        })
        .add_systems(Update, (log_fps, grow_on_space))
        .run();
}

/// Space doubles the particle count, which reseeds the GPU buffers.
fn grow_on_space(keys: Res<ButtonInput<KeyCode>>, mut controls: ResMut<SimulationControls>) {
    if keys.just_pressed(KeyCode::Space) {
        controls.particle_count *= 2;
    }
}

fn log_fps(
    diagnostics: Res<DiagnosticsStore>,
    settings: Res<GpuSimulationSettings>,
    mut timer: Local<f32>,
    time: Res<Time>,
) {
    *timer += time.delta_secs();
    if *timer < 1.0 {
        return;
    }
    *timer = 0.0;

    if let Some(fps) = diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(|fps| fps.smoothed())
    {
        info!(
            "{:.1} fps, {} particles (generation {})",
            fps, settings.particle_count, settings.generation
        );
    }
}
