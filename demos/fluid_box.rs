use bevy::input::ButtonInput;
use bevy::prelude::*;
use bevy_sph_fluid::{CpuFluidPlugin, FluidSolver, SimulationControls, SimulationStatus, SphConfig};

const PARTICLE_RADIUS: f32 = 0.12;
const COUNT_STEP: usize = 1000;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .insert_resource(ClearColor(Color::Srgba(
            bevy::color::palettes::css::DARK_SLATE_GRAY,
        )))
        .insert_resource(SimulationControls {
            particle_count: 4000,
            ..Default::default()
        })
        .add_plugins(CpuFluidPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (keyboard_controls, draw_particles, log_status))
        .run();
}

fn setup(mut commands: Commands) {
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0.0, 18.0, 42.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));
}

// blue (sparse) -> cyan -> yellow -> red (compressed)
fn density_color(t: f32) -> Color {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        let u = t * 2.0;
        Color::srgb(0.0, u, 1.0)
    } else if t < 0.75 {
        let u = (t - 0.5) / 0.25;
        Color::srgb(u, 1.0, 1.0 - u)
    } else {
        let u = (t - 0.75) / 0.25;
        Color::srgb(1.0, 1.0 - u, 0.0)
    }
}

/// Up/Down change the particle count, Left/Right the box width.
fn keyboard_controls(keys: Res<ButtonInput<KeyCode>>, mut controls: ResMut<SimulationControls>) {
    if keys.just_pressed(KeyCode::ArrowUp) {
        controls.particle_count += COUNT_STEP;
    }
    if keys.just_pressed(KeyCode::ArrowDown) && controls.particle_count > COUNT_STEP {
        controls.particle_count -= COUNT_STEP;
    }
    if keys.just_pressed(KeyCode::ArrowRight) {
        controls.box_extents.width += 2.0;
    }
    if keys.just_pressed(KeyCode::ArrowLeft) && controls.box_extents.width > 4.0 {
        controls.box_extents.width -= 2.0;
    }
}

fn draw_particles(mut gizmos: Gizmos, solver: Option<Res<FluidSolver>>, config: Res<SphConfig>) {
    let Some(solver) = solver else { return };

    // bevy 0.16 math is glam 0.29, the solver uses glam 0.30
    let size = Vec3::from_array(solver.extents().as_vec3().to_array());
    gizmos.cuboid(Transform::from_scale(size), Color::WHITE);

    for (p, &rho) in solver.positions().iter().zip(solver.densities()) {
        let t = (rho / config.rest_density - 0.5).max(0.0);
        gizmos.sphere(
            Isometry3d::from_translation(Vec3::from_array(p.to_array())),
            PARTICLE_RADIUS,
            density_color(t),
        );
    }
}

fn log_status(status: Res<SimulationStatus>, solver: Option<Res<FluidSolver>>) {
    if status.is_changed() {
        if let SimulationStatus::Faulted(reason) = &*status {
            warn!("simulation halted: {reason}");
        }
    }
    if let Some(solver) = solver {
        if solver.is_changed() && solver.steps() == 0 {
            info!("{} particles in {:?}", solver.particle_count(), solver.extents());
        }
    }
}
