use bevy::prelude::*;

use crate::config::{BoxExtents, DEFAULT_PARTICLE_COUNT, SphConfig};
use crate::cpu::device::ParallelDevice;
use crate::cpu::solver::FluidSolver;
use crate::error::SimError;

/// Grid statistics are logged every this many steps.
pub const STATS_INTERVAL: u64 = 120;

/// The knobs a parameter UI is allowed to turn. Changing either one
/// reseeds the simulation.
#[derive(Resource, Clone, Copy, Debug, PartialEq)]
pub struct SimulationControls {
    pub particle_count: usize,
    pub box_extents: BoxExtents,
}

impl Default for SimulationControls {
    fn default() -> Self {
        Self {
            particle_count: DEFAULT_PARTICLE_COUNT,
            box_extents: BoxExtents::default(),
        }
    }
}

#[derive(Resource, Clone, Debug, Default, PartialEq)]
pub enum SimulationStatus {
    #[default]
    Running,
    /// Stepping is suspended until the controls or the config change.
    Faulted(String),
}

/// Runs the SPH solver on the CPU, one step per `FixedUpdate`.
pub struct CpuFluidPlugin;

impl Plugin for CpuFluidPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SphConfig>()
            .init_resource::<SimulationControls>()
            .init_resource::<SimulationStatus>()
            .add_systems(PreUpdate, (sync_fixed_timestep, apply_controls))
            .add_systems(FixedUpdate, step_solver);
    }
}

// ========================== systems ==================================

fn sync_fixed_timestep(config: Res<SphConfig>, time: Option<ResMut<Time<Fixed>>>) {
    let Some(mut time) = time else {
        return;
    };
    if config.is_changed() && config.delta.is_finite() && config.delta > 0.0 {
        time.set_timestep_seconds(config.delta as f64);
    }
}

/// Builds the solver on the first frame and rebuilds it whenever the
/// controls or the config change.
fn apply_controls(
    mut commands: Commands,
    config: Res<SphConfig>,
    controls: Res<SimulationControls>,
    solver: Option<ResMut<FluidSolver>>,
    mut status: ResMut<SimulationStatus>,
) {
    if !(config.is_changed() || controls.is_changed()) {
        return;
    }

    let Some(mut solver) = solver else {
        match FluidSolver::initialize(
            ParallelDevice::default(),
            controls.particle_count,
            controls.box_extents,
            *config,
        ) {
            Ok(solver) => {
                commands.insert_resource(solver);
                *status = SimulationStatus::Running;
            }
            Err(err) => {
                error!("fluid solver failed to start: {err}");
                *status = SimulationStatus::Faulted(err.to_string());
            }
        }
        return;
    };

    let unchanged = solver.particle_count() == controls.particle_count
        && solver.extents() == controls.box_extents
        && *solver.config() == *config;
    if unchanged && *status == SimulationStatus::Running {
        return;
    }

    match solver.reinitialize(controls.particle_count, controls.box_extents, *config) {
        Ok(()) => *status = SimulationStatus::Running,
        // the previous generation is still intact and keeps running
        Err(SimError::Configuration(err)) => warn!("rejected simulation change: {err}"),
        Err(err) => {
            error!("fluid solver failed to reinitialize: {err}");
            *status = SimulationStatus::Faulted(err.to_string());
        }
    }
}

fn step_solver(solver: Option<ResMut<FluidSolver>>, mut status: ResMut<SimulationStatus>) {
    let Some(mut solver) = solver else {
        return;
    };
    if *status != SimulationStatus::Running {
        return;
    }

    if let Err(err) = solver.step() {
        error!("fluid step {} failed: {err}", solver.steps() + 1);
        *status = SimulationStatus::Faulted(err.to_string());
        return;
    }

    if solver.steps() % STATS_INTERVAL == 0 {
        let stats = solver.cells().stats();
        debug!(
            "step {}: {} occupied cells, max {} per cell, {} particles",
            solver.steps(),
            stats.occupied_cells,
            stats.max_cell_occupancy,
            stats.total_particles
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(particle_count: usize) -> App {
        let mut app = App::new();
        app.insert_resource(SimulationControls {
            particle_count,
            box_extents: BoxExtents::new(4.0, 4.0, 4.0),
        })
        .add_plugins(CpuFluidPlugin);
        app
    }

    #[test]
    fn builds_solver_on_first_update() {
        let mut app = app(64);
        app.update();

        let solver = app.world().resource::<FluidSolver>();
        assert_eq!(solver.particle_count(), 64);
        assert_eq!(solver.generation(), 0);
        assert_eq!(*app.world().resource::<SimulationStatus>(), SimulationStatus::Running);
    }

    #[test]
    fn fixed_update_steps_the_solver() {
        let mut app = app(32);
        app.update();
        app.world_mut().run_schedule(FixedUpdate);
        app.world_mut().run_schedule(FixedUpdate);
        assert_eq!(app.world().resource::<FluidSolver>().steps(), 2);
    }

    #[test]
    fn control_changes_reseed() {
        let mut app = app(32);
        app.update();
        app.update();
        assert_eq!(app.world().resource::<FluidSolver>().generation(), 0);

        app.world_mut().resource_mut::<SimulationControls>().particle_count = 48;
        app.update();
        let solver = app.world().resource::<FluidSolver>();
        assert_eq!(solver.particle_count(), 48);
        assert_eq!(solver.generation(), 1);
    }

    #[test]
    fn bad_controls_fault_only_at_startup() {
        let mut app = app(0);
        app.update();
        assert!(app.world().get_resource::<FluidSolver>().is_none());
        assert!(matches!(
            app.world().resource::<SimulationStatus>(),
            SimulationStatus::Faulted(_)
        ));

        app.world_mut().resource_mut::<SimulationControls>().particle_count = 16;
        app.update();
        assert_eq!(app.world().resource::<FluidSolver>().particle_count(), 16);
        assert_eq!(*app.world().resource::<SimulationStatus>(), SimulationStatus::Running);

        // a running solver survives a rejected change
        app.world_mut().resource_mut::<SimulationControls>().particle_count = 0;
        app.update();
        assert_eq!(app.world().resource::<FluidSolver>().particle_count(), 16);
        assert_eq!(*app.world().resource::<SimulationStatus>(), SimulationStatus::Running);
    }
}
