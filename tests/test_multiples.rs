mod common;

use approx::assert_abs_diff_eq;
use hyades::{
    Axes, Cluster, CpuKernel, GravityKernel, Hermite4, MultipleSystem, NullSink, Options,
    Particle,
};

/// Tight circular pair (separation 0.01) plus a distant witness star.
fn pair_with_witness() -> Vec<Particle> {
    vec![
        Particle::new(0, 0.5, Axes::from(-0.005, 0., 0.), Axes::from(0., -5., 0.)),
        Particle::new(1, 0.5, Axes::from(0.005, 0., 0.), Axes::from(0., 5., 0.)),
        Particle::new(2, 1., Axes::from(5., 0., 0.), Axes::from(0., 0., 0.)),
    ]
}

#[test]
fn close_pass_spawns_exactly_one_system() {
    let cluster = Cluster::new(pair_with_witness(), 0.).unwrap();
    let momentum_before = cluster.momentum();
    let options = Options { integration_time: 0.01, ..Options::default() };
    let mut integrator = Hermite4::new(cluster, options);
    let mut recorder = common::Recorder::default();
    integrator.integrate(&mut recorder);

    assert_eq!(integrator.multiples.len(), 1);
    let system = &integrator.multiples[0];
    assert_eq!(system.members[0].id, 0);
    assert_eq!(system.members[1].id, 1);

    // Ghost center of mass carries the combined mass, the relic none.
    assert_abs_diff_eq!(integrator.cluster.particles[0].mass, 1., epsilon = 0.);
    assert_abs_diff_eq!(integrator.cluster.particles[1].mass, 0., epsilon = 0.);

    let momentum = integrator.cluster.momentum();
    assert!(Axes::difference(&momentum, &momentum_before).norm() < 1e-10);

    // The reported total (direct sum plus internal energies) oscillates
    // around the true total at the amplitude of the neglected quadrupole
    // coupling with the witness.
    let initial = recorder.energies.first().unwrap().1;
    let final_energy = integrator.total_energy();
    let drift = ((final_energy - initial) / initial).abs();
    assert!(drift < 1e-6, "relative energy drift {drift}");
}

#[test]
fn witness_sees_only_the_center_of_mass_force() {
    let particles = vec![
        Particle::new(0, 0.5, Axes::from(-5e-5, 0., 0.), Axes::from(0., -0.01, 0.)),
        Particle::new(1, 0.5, Axes::from(5e-5, 0., 0.), Axes::from(0., 0.01, 0.)),
        Particle::new(2, 1., Axes::from(10., 0., 0.), Axes::from(0., 0., 0.)),
    ];
    let mut cluster = Cluster::new(particles, 0.).unwrap();
    let kernel = CpuKernel;

    let before = kernel.evaluate(&[2], &cluster)[0].forces;
    MultipleSystem::create(&mut cluster, 0, 1, 0.);
    let after = kernel.evaluate(&[2], &cluster)[0].forces;

    // Replacing the pair by its center of mass changes the witness force
    // only at the quadrupole level, far below round-off of the monopole.
    let delta = Axes::difference(&after.a, &before.a).norm();
    assert!(delta < 1e-11, "acceleration jump {delta}");
}

#[test]
fn termination_preserves_the_center_of_mass() {
    let mut cluster = Cluster::new(pair_with_witness(), 0.).unwrap();
    let mut system = MultipleSystem::create(&mut cluster, 0, 1, 0.);

    let com_position = cluster.particles[0].position;
    let com_velocity = cluster.particles[0].velocity;

    // Mimic an internal evolution that widened the pair beyond r_cl.
    for member in system.members.iter_mut() {
        member.position.mul(50.);
        member.velocity.mul(0.1);
    }
    system.restore(&mut cluster);

    let p0 = &cluster.particles[0];
    let p1 = &cluster.particles[1];
    let total = p0.mass + p1.mass;
    let mut restored_com = Axes::new();
    restored_com.addmul(p0.mass / total, &p0.position);
    restored_com.addmul(p1.mass / total, &p1.position);
    let mut restored_drift = Axes::new();
    restored_drift.addmul(p0.mass / total, &p0.velocity);
    restored_drift.addmul(p1.mass / total, &p1.velocity);

    assert!(Axes::difference(&restored_com, &com_position).norm() < 1e-14);
    assert!(Axes::difference(&restored_drift, &com_velocity).norm() < 1e-14);
}

#[test]
fn spawn_and_immediate_termination_round_trips_the_energy() {
    let particles = vec![
        Particle::new(0, 0.5, Axes::from(-0.005, 0., 0.), Axes::from(0., -5., 0.)),
        Particle::new(1, 0.5, Axes::from(0.005, 0., 0.), Axes::from(0., 5., 0.)),
    ];
    let mut cluster = Cluster::new(particles, 0.).unwrap();
    let energy_before = cluster.compute_energy(0.);

    let system = MultipleSystem::create(&mut cluster, 0, 1, 0.);
    // With the pair hidden, the direct sum plus the internal energy must
    // reproduce the total.
    let ghost_energy = cluster.compute_energy(system.energy());
    assert_abs_diff_eq!(ghost_energy, energy_before, epsilon = 1e-14 * energy_before.abs());

    system.restore(&mut cluster);
    let energy_after = cluster.compute_energy(0.);
    assert_abs_diff_eq!(energy_after, energy_before, epsilon = 1e-14 * energy_before.abs());
}

#[test]
fn relic_rejoins_the_grid_after_termination() {
    // Drive a spawned system past its close-encounter radius by shrinking
    // r_cl, then check that the next synchronization restores two massive
    // particles.
    let cluster = Cluster::new(pair_with_witness(), 0.).unwrap();
    let options = Options { integration_time: 0.5, ..Options::default() };
    let mut integrator = Hermite4::new(cluster, options);
    integrator.initialize(&mut NullSink);

    // Let the system spawn.
    while integrator.multiples.is_empty() {
        integrator.iterate(&mut NullSink).unwrap();
    }
    assert_eq!(integrator.multiples.len(), 1);

    // Force the termination condition and run to the next synchronization.
    integrator.cluster.attributes.r_cl = 1e-6;
    loop {
        match integrator.iterate(&mut NullSink) {
            Ok(true) => break,
            Ok(false) => continue,
            Err(_) => break,
        }
    }

    assert!(integrator.multiples.is_empty());
    assert!(integrator.cluster.particles[0].mass > 0.);
    assert!(integrator.cluster.particles[1].mass > 0.);
    let mass: f64 = integrator.cluster.particles.iter().map(|p| p.mass).sum();
    assert_abs_diff_eq!(mass, 2., epsilon = 1e-15);
}
