use crate::constants::{
    D_TIME_MAX, D_TIME_MIN, E2, ETA_N, ETA_S, LAGRANGE_RATIO, UNDERFLOW_WARNING_LIMIT,
};
use crate::encounters;
use crate::gravity::{CpuKernel, GravityKernel};
use crate::integrator::output::OutputSink;
use crate::multiples::MultipleSystem;
use crate::particles::{Axes, Cluster, Particle};
use crate::tools;

/// Scalar configuration of the integrator. Defaults follow the wire-stable
/// constants of the crate.
#[derive(Debug, Clone)]
pub struct Options {
    pub eta_s: f64,
    pub eta_n: f64,
    pub integration_time: f64,
    pub print_all: bool,
    pub print_lagrange: bool,
    /// Mass-fraction spacing of the Lagrange shells.
    pub lagrange_ratio: f64,
    /// Close-encounter detection and binary regularization. When off, the
    /// scheme is the plain Hermite integrator.
    pub multiple_systems: bool,
    /// Step underflows tolerated per particle before warning the log sink.
    pub underflow_warning_limit: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            eta_s: ETA_S,
            eta_n: ETA_N,
            integration_time: 1.,
            print_all: false,
            print_lagrange: false,
            lagrange_ratio: LAGRANGE_RATIO,
            multiple_systems: true,
            underflow_warning_limit: UNDERFLOW_WARNING_LIMIT,
        }
    }
}

/// Fourth-order Hermite predictor–corrector on hierarchical block time
/// steps, with close-encounter detection feeding the time-symmetric
/// two-body sub-integrator of `multiples`.
pub struct Hermite4 {
    pub cluster: Cluster,
    kernel: Box<dyn GravityKernel>,
    pub options: Options,
    /// Integration time of the last processed iteration (ITIME).
    pub current_time: f64,
    /// Next integration time picked by the scheduler (ATIME).
    next_time: f64,
    pub iterations: u64,
    pub interactions: u64,
    pub nsteps: u64,
    pub multiples: Vec<MultipleSystem>,
    active: Vec<usize>,
    underflows: Vec<u32>,
    underflow_warned: Vec<bool>,
    target_neighbours: usize,
}

impl Hermite4 {
    pub fn new(cluster: Cluster, options: Options) -> Hermite4 {
        Self::with_kernel(cluster, options, Box::new(CpuKernel))
    }

    pub fn with_kernel(
        cluster: Cluster,
        options: Options,
        kernel: Box<dyn GravityKernel>,
    ) -> Hermite4 {
        let n = cluster.n;
        let target_neighbours = (n as f64).sqrt().ceil() as usize;
        Hermite4 {
            cluster,
            kernel,
            options,
            current_time: 0.,
            next_time: 0.,
            iterations: 0,
            interactions: 0,
            nsteps: 0,
            multiples: Vec::new(),
            active: Vec::new(),
            underflows: vec![0; n],
            underflow_warned: vec![false; n],
            target_neighbours,
        }
    }

    /// Initial force evaluation, cluster attributes, neighbour spheres and
    /// first time steps. Emits the startup info block and the t = 0 energy
    /// log line.
    pub fn initialize<S: OutputSink + ?Sized>(&mut self, sink: &mut S) {
        let initial_energy = self.cluster.compute_energy(0.);
        self.cluster.energies.initial = initial_energy;
        self.cluster.energies.previous = initial_energy;
        tools::compute_attributes(&mut self.cluster);
        self.reset_neighbour_spheres();

        for particle in self.cluster.particles.iter_mut() {
            particle.predicted_position = particle.position;
            particle.predicted_velocity = particle.velocity;
        }

        let targets: Vec<usize> = (0..self.cluster.n)
            .filter(|&i| !self.cluster.particles[i].is_massless())
            .collect();
        let results = self.kernel.evaluate(&targets, &self.cluster);
        for result in results {
            let particle = &mut self.cluster.particles[result.target];
            particle.forces = result.forces;
            particle.old_forces = result.forces;
            self.cluster.neighbours[result.target] = result.neighbours;
        }

        for particle in self.cluster.particles.iter_mut() {
            let a = particle.forces.a.norm();
            let a1 = particle.forces.a1.norm();
            let raw = self.options.eta_s * a / a1;
            particle.time_step = if raw.is_finite() { quantize_down(raw) } else { D_TIME_MAX };
        }
        self.next_time = self.cluster.next_integration_time();

        let attributes = &self.cluster.attributes;
        sink.info(&format!(
            "n = {}, total mass = {:.6e}, softening^2 = {:.3e}",
            self.cluster.n, self.cluster.total_mass, self.cluster.softening_2
        ));
        sink.info(&format!(
            "r_virial = {:.6e}, r_cl = {:.6e}, t_cr = {:.6e}, t_rlx = {:.6e}",
            attributes.r_virial, attributes.r_cl, attributes.t_crossing, attributes.t_relaxation
        ));
        for (step, count) in tools::time_step_distribution(&self.cluster) {
            sink.info(&format!("initial step {step:.9e}: {count} particles"));
        }

        sink.energy_log(0., 0, 0, 0, initial_energy);
        if self.options.print_all {
            sink.snapshot(0., &self.resolved_particles());
        }
        if self.options.print_lagrange {
            let radii = tools::lagrange_radii(&self.cluster, self.options.lagrange_ratio);
            sink.lagrange_radii(0., &radii);
        }
    }

    /// One scheduler iteration: advance the active block to the next
    /// integration time. Returns whether this iteration was a global
    /// synchronization, or Err once the stop time has been reached.
    pub fn iterate<S: OutputSink + ?Sized>(&mut self, sink: &mut S) -> Result<bool, String> {
        let itime = self.next_time;
        self.current_time = itime;

        self.cluster.find_active(itime, &mut self.active);
        let nact = self.active.len();
        self.cluster.save_old_forces(&self.active);

        if self.options.multiple_systems && !self.multiples.is_empty() {
            for system in self.multiples.iter_mut() {
                system.update_perturbation(&self.cluster);
            }
            for system in self.multiples.iter_mut() {
                system.advance(itime);
            }
        }

        self.cluster.predict(itime);

        let targets: Vec<usize> = self
            .active
            .iter()
            .copied()
            .filter(|&i| !self.cluster.particles[i].is_massless())
            .collect();
        let results = self.kernel.evaluate(&targets, &self.cluster);
        for result in results {
            let count = result.neighbours.len();
            let particle = &mut self.cluster.particles[result.target];
            particle.forces = result.forces;
            self.cluster.neighbours[result.target] = result.neighbours;
            self.adapt_neighbour_sphere(result.target, count);
        }

        for k in 0..nact {
            let i = self.active[k];
            if self.cluster.particles[i].is_massless() {
                self.advance_massless(i, itime);
            } else {
                self.correct_and_reselect(i, itime, sink);
            }
        }

        let pairs = if self.options.multiple_systems {
            let mut in_system = vec![false; self.cluster.n];
            for system in &self.multiples {
                in_system[system.members[0].id] = true;
                in_system[system.members[1].id] = true;
            }
            encounters::detect_pairs(&self.cluster, &self.active, &in_system)
        } else {
            Vec::new()
        };

        for pair in &pairs {
            let system =
                MultipleSystem::create(&mut self.cluster, pair.first, pair.second, itime);
            sink.info(&format!(
                "new multiple system ({}, {}) | E0 = {:.15e}",
                pair.first, pair.second, system.initial_energy
            ));
            self.multiples.push(system);
        }

        self.interactions += (nact * self.cluster.n) as u64;

        let synchronized = nact == self.cluster.n;
        if synchronized {
            self.synchronize(itime, sink);
        }

        // Advance the clock last: spawns and terminations above reset the
        // steps of the slots they touched.
        self.next_time = self.cluster.next_integration_time();

        self.nsteps += nact as u64;
        self.iterations += 1;

        if itime >= self.options.integration_time {
            Err("Simulation completed".to_string())
        } else {
            Ok(synchronized)
        }
    }

    /// Drives the integrator from initialization to the stop time.
    pub fn integrate<S: OutputSink + ?Sized>(&mut self, sink: &mut S) {
        self.initialize(sink);
        while self.iterate(sink).is_ok() {}
    }

    /// Global synchronization: all particles are at the same time, so the
    /// energy log, the optional outputs and the multiple-system termination
    /// scan run here.
    fn synchronize<S: OutputSink + ?Sized>(&mut self, itime: f64, sink: &mut S) {
        // Per-iteration accumulator, zeroed before use.
        let mut ms_energy = 0.;
        for system in &self.multiples {
            ms_energy += system.energy();
        }
        let energy = self.cluster.compute_energy(ms_energy);
        self.cluster.energies.previous = energy;
        sink.energy_log(itime, self.iterations, self.interactions, self.nsteps, energy);

        if self.options.print_all {
            sink.snapshot(itime, &self.resolved_particles());
        }
        if self.options.print_lagrange {
            let radii = tools::lagrange_radii(&self.cluster, self.options.lagrange_ratio);
            sink.lagrange_radii(itime, &radii);
        }

        // Collect first, erase afterwards.
        let r_cl = self.cluster.attributes.r_cl;
        let expired: Vec<usize> = self
            .multiples
            .iter()
            .enumerate()
            .filter(|(_, system)| system.separation() > r_cl || system.flagged)
            .map(|(index, _)| index)
            .collect();
        for &index in expired.iter().rev() {
            let system = self.multiples.remove(index);
            system.restore(&mut self.cluster);
            sink.info(&format!(
                "multiple system ({}, {}) terminated | E = {:.15e}",
                system.members[0].id,
                system.members[1].id,
                system.energy()
            ));
        }
    }

    /// Hermite correction and time-step reselection for one active target.
    fn correct_and_reselect<S: OutputSink + ?Sized>(
        &mut self,
        i: usize,
        itime: f64,
        sink: &mut S,
    ) {
        let eta_n = self.options.eta_n;
        let particle = &mut self.cluster.particles[i];

        let dt1 = particle.time_step;
        let dt2 = dt1 * dt1;
        let dt3 = dt2 * dt1;
        let dt4 = dt2 * dt2;
        let dt5 = dt4 * dt1;

        let delta_a =
            Axes::difference(&particle.old_forces.a, &particle.forces.a);
        let mut a2 = Axes::new();
        a2.addmul(-6. / dt2, &delta_a);
        a2.addmul(-4. / dt1, &particle.old_forces.a1);
        a2.addmul(-2. / dt1, &particle.forces.a1);
        let mut a3 = Axes::new();
        a3.addmul(12. / dt3, &delta_a);
        a3.addmul(6. / dt2, &particle.old_forces.a1);
        a3.addmul(6. / dt2, &particle.forces.a1);

        let mut position = particle.predicted_position;
        position.addmul(dt4 / 24., &a2);
        position.addmul(dt5 / 120., &a3);
        let mut velocity = particle.predicted_velocity;
        velocity.addmul(dt3 / 6., &a2);
        velocity.addmul(dt4 / 24., &a3);

        particle.position = position;
        particle.velocity = velocity;
        particle.a2 = a2;
        particle.a3 = a3;
        particle.current_time = itime;

        let raw = normal_time_step(particle, eta_n);
        particle.time_step = normalize_time_step(raw, dt1, itime);

        if raw < D_TIME_MIN {
            self.underflows[i] += 1;
            if self.underflows[i] > self.options.underflow_warning_limit
                && !self.underflow_warned[i]
            {
                self.underflow_warned[i] = true;
                sink.warning(&format!(
                    "particle {i} underflowed the minimum time step {} times",
                    self.underflows[i]
                ));
            }
        }
    }

    /// Massless relics never see forces; they adopt their predicted state
    /// and their step doubles whenever the grid allows, so they ride along
    /// without pinning the scheduler to the minimum step.
    fn advance_massless(&mut self, i: usize, itime: f64) {
        let particle = &mut self.cluster.particles[i];
        particle.position = particle.predicted_position;
        particle.velocity = particle.predicted_velocity;
        particle.current_time = itime;
        let doubled = 2. * particle.time_step;
        if doubled <= D_TIME_MAX {
            let val = itime / doubled;
            if val.ceil() == val {
                particle.time_step = doubled;
            }
        }
    }

    fn reset_neighbour_spheres(&mut self) {
        let attributes = self.cluster.attributes;
        let n = self.cluster.n;
        let fraction = self.target_neighbours as f64 / n as f64;
        let mut radius = attributes.r_virial * fraction.cbrt();
        if !radius.is_finite() || radius < attributes.r_cl {
            radius = attributes.r_cl;
        }
        for particle in self.cluster.particles.iter_mut() {
            particle.neighbour_radius = radius;
        }
    }

    /// Nudges the neighbour sphere of a target so the list size trends
    /// toward the target count, clamped to [r_cl, r_virial].
    fn adapt_neighbour_sphere(&mut self, i: usize, count: usize) {
        let attributes = self.cluster.attributes;
        if attributes.r_cl <= 0. {
            return;
        }
        let particle = &mut self.cluster.particles[i];
        if count > 2 * self.target_neighbours {
            particle.neighbour_radius *= 0.9;
        } else if 2 * count < self.target_neighbours {
            particle.neighbour_radius *= 1.1;
        }
        particle.neighbour_radius = particle
            .neighbour_radius
            .clamp(attributes.r_cl, attributes.r_virial.max(attributes.r_cl));
    }

    /// Particle set with every multiple system expanded back to its
    /// physical members; this is what snapshots and downstream diagnostics
    /// should see.
    pub fn resolved_particles(&self) -> Vec<Particle> {
        let mut particles = self.cluster.particles.clone();
        for system in &self.multiples {
            let ghost = particles[system.members[0].id];
            for member in &system.members {
                let slot = &mut particles[member.id];
                let mut position = ghost.position;
                position.add(&member.position);
                let mut velocity = ghost.velocity;
                velocity.add(&member.velocity);
                slot.mass = member.mass;
                slot.position = position;
                slot.velocity = velocity;
            }
        }
        particles
    }

    /// Dense output: the resolved particle set extrapolated to `time` with
    /// the full Taylor series through the third acceleration derivative.
    /// Block steps only stop on power-of-two times, so this is how state at
    /// an arbitrary physical time is read out.
    pub fn resolved_particles_at(&self, time: f64) -> Vec<Particle> {
        let mut particles = self.cluster.particles.clone();
        for particle in particles.iter_mut() {
            let dt = time - particle.current_time;
            let (position, velocity) = taylor_series(
                &particle.position,
                &particle.velocity,
                &particle.forces.a,
                &particle.forces.a1,
                &particle.a2,
                &particle.a3,
                dt,
            );
            particle.position = position;
            particle.velocity = velocity;
            particle.current_time = time;
        }
        for system in &self.multiples {
            let ghost = particles[system.members[0].id];
            let dt = time - system.time;
            for member in &system.members {
                let (relative_position, relative_velocity) = taylor_series(
                    &member.position,
                    &member.velocity,
                    &member.forces.a,
                    &member.forces.a1,
                    &member.a2,
                    &member.a3,
                    dt,
                );
                let slot = &mut particles[member.id];
                let mut position = ghost.position;
                position.add(&relative_position);
                let mut velocity = ghost.velocity;
                velocity.add(&relative_velocity);
                slot.mass = member.mass;
                slot.position = position;
                slot.velocity = velocity;
            }
        }
        particles
    }

    /// Total energy: direct-sum terms over the ghost representation plus
    /// the internal energies of the multiple systems.
    pub fn total_energy(&mut self) -> f64 {
        let mut ms_energy = 0.;
        for system in &self.multiples {
            ms_energy += system.energy();
        }
        self.cluster.compute_energy(ms_energy)
    }
}

#[allow(clippy::too_many_arguments)]
fn taylor_series(
    position: &Axes,
    velocity: &Axes,
    a: &Axes,
    a1: &Axes,
    a2: &Axes,
    a3: &Axes,
    dt: f64,
) -> (Axes, Axes) {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt2 * dt2;
    let dt5 = dt4 * dt;

    let mut new_position = *position;
    new_position.addmul(dt, velocity);
    new_position.addmul(dt2 / 2., a);
    new_position.addmul(dt3 / 6., a1);
    new_position.addmul(dt4 / 24., a2);
    new_position.addmul(dt5 / 120., a3);

    let mut new_velocity = *velocity;
    new_velocity.addmul(dt, a);
    new_velocity.addmul(dt2 / 2., a1);
    new_velocity.addmul(dt3 / 6., a2);
    new_velocity.addmul(dt4 / 24., a3);

    (new_position, new_velocity)
}

/// Builds a cluster with the default softening and wraps it in an
/// integrator; the common entry point for callers with plain (m, r, v)
/// initial conditions.
pub fn from_initial_conditions(
    particles: Vec<Particle>,
    options: Options,
) -> Result<Hermite4, crate::errors::InitError> {
    let cluster = Cluster::new(particles, E2)?;
    Ok(Hermite4::new(cluster, options))
}

/// Aarseth time-step criterion (Makino & Aarseth 1992, eq. 7), with the
/// second derivative extrapolated across the step just taken. Falls back to
/// the maximum step when the derivatives vanish (isolated particles).
pub fn normal_time_step(particle: &Particle, eta: f64) -> f64 {
    let mut a2_next = particle.a2;
    a2_next.addmul(particle.time_step, &particle.a3);

    let a = particle.forces.a.norm();
    let a1 = particle.forces.a1.norm();
    let a2 = a2_next.norm();
    let a3 = particle.a3.norm();

    let denominator = a1 * a3 + a2 * a2;
    if denominator == 0. {
        return D_TIME_MAX;
    }
    let dt = (eta * (a * a2 + a1 * a1) / denominator).sqrt();
    if dt.is_finite() { dt } else { D_TIME_MAX }
}

/// Quantizes a freshly estimated step against the old one, keeping the
/// block grid commensurate: shrinking is always allowed (by octaves),
/// growing only when the local time is a multiple of the doubled step.
pub fn normalize_time_step(new_dt: f64, old_dt: f64, t: f64) -> f64 {
    let quantized = if new_dt <= old_dt / 8. {
        D_TIME_MIN
    } else if new_dt <= old_dt / 4. {
        old_dt / 8.
    } else if new_dt <= old_dt / 2. {
        old_dt / 4.
    } else if new_dt <= old_dt {
        old_dt / 2.
    } else if new_dt <= 2. * old_dt {
        old_dt
    } else {
        let val = t / (2. * old_dt);
        if val.ceil() == val { 2. * old_dt } else { old_dt }
    };
    quantized.clamp(D_TIME_MIN, D_TIME_MAX)
}

/// Largest power of two not above `dt`, clamped to the block-step range.
pub fn quantize_down(dt: f64) -> f64 {
    if dt <= D_TIME_MIN {
        return D_TIME_MIN;
    }
    if dt >= D_TIME_MAX {
        return D_TIME_MAX;
    }
    let exponent = dt.log2().floor() as i32;
    2f64.powi(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizer_shrinks_by_octaves() {
        // New step slightly above half the old one: drop one octave.
        let dt = normalize_time_step(1. / 30., 1. / 16., 0.5);
        assert_eq!(dt, 1. / 32.);
        // New step far below an eighth of the old one: clamp to the floor.
        let dt = normalize_time_step(1. / 200., 1. / 16., 0.5);
        assert_eq!(dt, D_TIME_MIN);
        // In the (1/8, 1/4] band the step drops three octaves.
        let dt = normalize_time_step(1. / 100., 1. / 16., 0.5);
        assert_eq!(dt, 1. / 128.);
    }

    #[test]
    fn quantizer_grows_only_on_commensurate_times() {
        // t = 3/16 is not a multiple of 1/8, so the step cannot double.
        let dt = normalize_time_step(1. / 5., 1. / 16., 3. / 16.);
        assert_eq!(dt, 1. / 16.);
        // t = 1/4 is a multiple of 1/8: doubling is allowed.
        let dt = normalize_time_step(1. / 5., 1. / 16., 0.25);
        assert_eq!(dt, 1. / 8.);
    }

    #[test]
    fn quantizer_is_idempotent_on_its_own_output() {
        let old_dt = 1. / 16.;
        let first = normalize_time_step(1. / 30., old_dt, 0.5);
        let second = normalize_time_step(1. / 30., old_dt, 0.5);
        assert_eq!(first, second);
    }

    #[test]
    fn quantizer_respects_bounds() {
        assert_eq!(normalize_time_step(1., 0.125, 0.25), 0.125);
        assert_eq!(normalize_time_step(0., D_TIME_MIN, 0.5), D_TIME_MIN);
    }

    #[test]
    fn quantize_down_picks_enclosed_power_of_two() {
        assert_eq!(quantize_down(0.01), 0.0078125);
        assert_eq!(quantize_down(0.125), 0.125);
        assert_eq!(quantize_down(1.), 0.125);
        assert_eq!(quantize_down(1e-12), D_TIME_MIN);
        assert_eq!(quantize_down(0.0625), 0.0625);
    }

    #[test]
    fn default_entry_point_uses_the_default_softening() {
        let particles = vec![
            Particle::new(0, 0.5, Axes::from(-0.5, 0., 0.), Axes::from(0., -0.5, 0.)),
            Particle::new(1, 0.5, Axes::from(0.5, 0., 0.), Axes::from(0., 0.5, 0.)),
        ];
        let integrator = from_initial_conditions(particles, Options::default()).unwrap();
        assert_eq!(integrator.cluster.softening_2, E2);
    }

    #[test]
    fn block_step_invariants_hold_while_iterating() {
        use crate::integrator::output::NullSink;

        // A wide, bound four-body configuration; binaries disabled so only
        // the plain block-step machinery runs.
        let particles = vec![
            Particle::new(0, 0.25, Axes::from(1., 0., 0.), Axes::from(0., 0.4, 0.)),
            Particle::new(1, 0.25, Axes::from(-1., 0., 0.), Axes::from(0., -0.4, 0.)),
            Particle::new(2, 0.25, Axes::from(0., 1., 0.), Axes::from(-0.4, 0., 0.)),
            Particle::new(3, 0.25, Axes::from(0., -1., 0.), Axes::from(0.4, 0., 0.)),
        ];
        let cluster = Cluster::new(particles, 0.).unwrap();
        let options = Options {
            integration_time: 2.,
            multiple_systems: false,
            ..Options::default()
        };
        let mut integrator = Hermite4::new(cluster, options);
        integrator.initialize(&mut NullSink);

        for _ in 0..200 {
            if integrator.iterate(&mut NullSink).is_err() {
                break;
            }
            for particle in &integrator.cluster.particles {
                // Local times never run ahead of the global clock.
                assert!(particle.current_time <= integrator.current_time);
                // Steps stay on the power-of-two grid within the limits.
                let dt = particle.time_step;
                assert!((D_TIME_MIN..=D_TIME_MAX).contains(&dt));
                let octaves = dt / D_TIME_MIN;
                assert_eq!(octaves.fract(), 0.);
                assert!((octaves as u64).is_power_of_two());
                // The end of every step is commensurate with the step.
                let quotient = (particle.current_time + dt) / dt;
                assert_eq!(quotient.fract(), 0.);
            }
        }
    }
}
