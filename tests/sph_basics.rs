use bevy_sph_fluid::config::BOUNDARY_INSET;
use bevy_sph_fluid::cpu::kernels::self_density;
use bevy_sph_fluid::{
    BoxExtents, ConfigError, FluidSolver, NeighborPolicy, ParallelDevice, SerialDevice, SimError,
    SphConfig,
};
use glam::Vec3;

fn no_gravity() -> SphConfig {
    SphConfig {
        gravity: Vec3::ZERO,
        ..Default::default()
    }
}

#[test]
fn grid_is_consistent_after_build() {
    let mut solver = FluidSolver::initialize(
        ParallelDevice::default(),
        3000,
        BoxExtents::new(12.0, 6.0, 6.0),
        SphConfig::default(),
    )
    .unwrap();
    solver.step().unwrap(); // particles moved, rebuild against the new positions
    solver.rebuild_grid().unwrap();

    let cells = solver.cells();
    let grid = solver.grid_params();
    let total: u64 = (0..cells.cell_total()).map(|c| cells.count(c) as u64).sum();
    assert_eq!(total, 3000);
    assert_eq!(cells.cell_start_index[0], 0);

    for c in 0..cells.cell_total() - 1 {
        assert!(cells.cell_start_index[c] <= cells.cell_start_index[c + 1]);
        assert_eq!(cells.cell_start_index[c] + cells.count(c), cells.cell_start_index[c + 1]);
    }
    for c in 0..cells.cell_total() {
        for slot in cells.cell_range(c) {
            assert_eq!(grid.cell_index(solver.positions()[slot]), c);
        }
    }
}

#[test]
fn densities_and_pressures_are_bounded_below() {
    let config = SphConfig::default();
    let extents = BoxExtents::new(8.0, 4.0, 4.0);
    let mut solver = FluidSolver::initialize(SerialDevice, 800, extents, config).unwrap();
    let floor = self_density(solver.kernels(), config.mass);

    for _ in 0..10 {
        solver.step().unwrap();
        assert!(solver.densities().iter().all(|&d| d >= floor));
        assert!(solver.pressures().iter().all(|&p| p >= 0.0));
    }
    // this many particles in that box are well above rest density somewhere
    assert!(solver.pressures().iter().any(|&p| p > 0.0));
}

#[test]
fn symmetric_pair_forces_cancel() {
    let config = SphConfig {
        mass: 1.0,
        ..no_gravity()
    };
    // both in the same interior cell, so no clamped duplicates
    let mut solver =
        FluidSolver::initialize(SerialDevice, 2, BoxExtents::new(4.0, 4.0, 4.0), config).unwrap();
    let a = Vec3::new(0.2, 0.5, 0.5);
    let b = Vec3::new(0.5, 0.5, 0.5);
    solver.set_particle_state(&[a, b], &[Vec3::ZERO; 2]).unwrap();
    solver.step().unwrap();

    let densities = solver.densities();
    assert!(densities[0] > config.rest_density);
    assert_eq!(densities[0], densities[1]);

    let forces = solver.pressure_forces();
    assert!(forces[0].length() > 0.0);
    assert!((forces[0] + forces[1]).length() < 1e-5 * forces[0].length());
    // repulsive: the left particle is pushed further left
    assert!(forces[0].x < 0.0 && forces[1].x > 0.0);
    assert!(forces[0].y.abs() < 1e-6 && forces[0].z.abs() < 1e-6);
}

#[test]
fn wall_reflects_outgoing_particle() {
    let extents = BoxExtents::new(4.0, 4.0, 4.0);
    let mut solver =
        FluidSolver::initialize(SerialDevice, 1, extents, SphConfig::default()).unwrap();
    let half = extents.half();
    solver
        .set_particle_state(&[Vec3::new(half.x + 1e-4, 0.0, 0.0)], &[Vec3::new(1.0, 0.0, 0.0)])
        .unwrap();
    solver.step().unwrap();

    let p = solver.positions()[0];
    let v = solver.velocities()[0];
    assert!(p.x <= half.x);
    assert!((p.x - (half.x - BOUNDARY_INSET)).abs() < 1e-5);
    assert!(v.x <= 0.0);
}

#[test]
fn reseed_puts_every_particle_inside() {
    let mut solver = FluidSolver::initialize(
        SerialDevice,
        10,
        BoxExtents::new(6.0, 3.0, 3.0),
        SphConfig::default(),
    )
    .unwrap();
    for _ in 0..3 {
        solver.step().unwrap();
    }

    solver.set_particle_count(1234).unwrap();
    assert_eq!(solver.positions().len(), 1234);
    assert_eq!(solver.velocities().len(), 1234);
    assert!(solver.positions().iter().all(|&p| solver.extents().strictly_contains(p)));
    assert!(solver.velocities().iter().all(|&v| v == Vec3::ZERO));

    solver.set_box_extents(10.0, 2.0, 5.0).unwrap();
    assert_eq!(solver.positions().len(), 1234);
    let resized = BoxExtents::new(10.0, 2.0, 5.0);
    assert!(solver.positions().iter().all(|&p| resized.strictly_contains(p)));
    assert_eq!(solver.generation(), 2);
}

#[test]
fn reseeding_is_deterministic() {
    let extents = BoxExtents::new(5.0, 5.0, 5.0);
    let a = FluidSolver::initialize(SerialDevice, 100, extents, SphConfig::default()).unwrap();
    let b =
        FluidSolver::initialize(ParallelDevice::default(), 100, extents, SphConfig::default())
            .unwrap();
    assert_eq!(a.positions(), b.positions());
}

#[test]
fn colliding_pair_pushes_apart() {
    // Only holds in a box this small. Both particles share a corner cell of
    // a 2 x 2 x 2 grid and the clamped neighborhood visits that cell eight
    // times, which lifts the density above rest. The same pair in an interior
    // cell of the default 32 x 16 x 16 box reaches about 0.55 < 0.8, has zero
    // pressure and does not move.
    let config = no_gravity();
    let mut solver =
        FluidSolver::initialize(SerialDevice, 2, BoxExtents::new(2.0, 2.0, 2.0), config).unwrap();
    solver
        .set_particle_state(&[Vec3::ZERO, Vec3::new(0.3, 0.0, 0.0)], &[Vec3::ZERO; 2])
        .unwrap();
    solver.step().unwrap();

    assert!(solver.densities().iter().all(|&d| d > config.rest_density));

    let xs: Vec<f32> = solver.positions().iter().map(|p| p.x).collect();
    let (min, max) = (xs[0].min(xs[1]), xs[0].max(xs[1]));
    assert!(min < 0.0, "left particle moved to {min}");
    assert!(max > 0.3, "right particle moved to {max}");
    assert!(solver.positions().iter().all(|p| p.y == 0.0 && p.z == 0.0));
}

#[test]
fn skipping_edge_cells_lowers_wall_density() {
    let extents = BoxExtents::new(2.0, 2.0, 2.0);
    let state = [Vec3::ZERO, Vec3::new(0.3, 0.0, 0.0)];
    let run = |policy| {
        let config = SphConfig {
            neighbor_policy: policy,
            ..no_gravity()
        };
        let mut solver = FluidSolver::initialize(SerialDevice, 2, extents, config).unwrap();
        solver.set_particle_state(&state, &[Vec3::ZERO; 2]).unwrap();
        solver.step().unwrap();
        solver.densities()[0]
    };

    let clamped = run(NeighborPolicy::Clamp);
    let skipped = run(NeighborPolicy::Skip);
    assert!(clamped > skipped);
    // every neighbor counted once leaves this pair below rest density
    assert!(skipped < SphConfig::default().rest_density);
}

#[test]
fn invalid_setups_are_configuration_errors() {
    let bad_radius = SphConfig {
        smoothing_radius: -1.0,
        ..Default::default()
    };
    let err = FluidSolver::initialize(SerialDevice, 10, BoxExtents::default(), bad_radius).err();
    assert_eq!(err, Some(SimError::Configuration(ConfigError::SmoothingRadius(-1.0))));

    let err = FluidSolver::initialize(
        SerialDevice,
        10,
        BoxExtents::new(0.5, 4.0, 4.0),
        SphConfig::default(),
    )
    .err();
    assert!(matches!(
        err,
        Some(SimError::Configuration(ConfigError::EmptyGrid { axis: 'x', .. }))
    ));

    // too many cells is an error, not an overflow
    let huge = BoxExtents::new(1e7, 1e7, 1e7);
    let err = FluidSolver::initialize(SerialDevice, 10, huge, SphConfig::default()).err();
    assert!(matches!(
        err,
        Some(SimError::Configuration(ConfigError::GridTooLarge { .. }))
    ));

    let extents = BoxExtents::new(4.0, 4.0, 4.0);
    let mut solver =
        FluidSolver::initialize(SerialDevice, 10, extents, SphConfig::default()).unwrap();
    assert!(solver.set_config(bad_radius).is_err());
    assert_eq!(*solver.config(), SphConfig::default());

    assert!(solver.set_box_extents(1e7, 1e7, 1e7).is_err());
    assert_eq!(solver.extents(), extents);
    assert_eq!(solver.generation(), 0);
}
