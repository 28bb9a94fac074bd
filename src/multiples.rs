use crate::constants::{D_TIME_MIN, DEL_E, DEL_E_HYP, ETA_N, ETA_S, G, KEPLER_ITE};
use crate::particles::{Axes, Cluster, Forces};

/// One member of a multiple system. Position and velocity are relative to
/// the pair's center of mass; `mass` is the physical mass even while the
/// global slot is masked.
#[derive(Debug, Clone, Copy)]
pub struct Member {
    pub id: usize,
    pub mass: f64,
    pub position: Axes,
    pub velocity: Axes,
    pub forces: Forces,
    pub old_forces: Forces,
    pub a2: Axes,
    pub a3: Axes,
    /// Differential tidal acceleration with respect to the center of mass,
    /// refreshed once per global step and held fixed while sub-cycling.
    pub perturbation: Axes,
}

/// A bound two-body subsystem evolved on its own time grid between global
/// synchronizations. The primary's global slot carries the center of mass
/// with the combined mass; the secondary's slot is masked to mass zero and
/// parked at the center of mass until termination.
#[derive(Debug, Clone)]
pub struct MultipleSystem {
    pub members: [Member; 2],
    /// Internal time, aligned with the global clock.
    pub time: f64,
    pub time_step: f64,
    pub initial_energy: f64,
    /// Work exchanged with the environment through the tidal field.
    pub tidal_work: f64,
    /// Set when the time-symmetric corrector failed to converge; flagged
    /// systems are terminated at the next synchronization.
    pub flagged: bool,
}

impl MultipleSystem {
    /// Creation protocol: computes the center of mass, rewrites the two
    /// global slots (ghost + massless relic) and initializes the internal
    /// Hermite state of the pair.
    pub fn create(cluster: &mut Cluster, first: usize, second: usize, itime: f64) -> MultipleSystem {
        let p0 = cluster.particles[first];
        let p1 = cluster.particles[second];
        let total_mass = p0.mass + p1.mass;

        let mut com_position = Axes::new();
        com_position.addmul(p0.mass / total_mass, &p0.position);
        com_position.addmul(p1.mass / total_mass, &p1.position);
        let mut com_velocity = Axes::new();
        com_velocity.addmul(p0.mass / total_mass, &p0.velocity);
        com_velocity.addmul(p1.mass / total_mass, &p1.velocity);

        let member = |p: &crate::particles::Particle| Member {
            id: p.id,
            mass: p.mass,
            position: Axes::difference(&p.position, &com_position),
            velocity: Axes::difference(&p.velocity, &com_velocity),
            forces: Forces::new(),
            old_forces: Forces::new(),
            a2: Axes::new(),
            a3: Axes::new(),
            perturbation: Axes::new(),
        };
        let mut members = [member(&p0), member(&p1)];

        // Center-of-mass force, so the ghost keeps a sensible (a, jerk)
        // until its first evaluation as an active particle.
        let mut com_forces = Forces::new();
        com_forces.a.addmul(p0.mass / total_mass, &p0.forces.a);
        com_forces.a.addmul(p1.mass / total_mass, &p1.forces.a);
        com_forces.a1.addmul(p0.mass / total_mass, &p0.forces.a1);
        com_forces.a1.addmul(p1.mass / total_mass, &p1.forces.a1);

        {
            let ghost = &mut cluster.particles[first];
            ghost.mass = total_mass;
            ghost.position = com_position;
            ghost.velocity = com_velocity;
            ghost.predicted_position = com_position;
            ghost.predicted_velocity = com_velocity;
            ghost.forces = com_forces;
            ghost.old_forces = com_forces;
            ghost.a2.zero();
            ghost.a3.zero();
            ghost.current_time = itime;
            ghost.time_step = D_TIME_MIN;
        }
        {
            // The relic keeps its record but is masked out of every force
            // sum; it stays on the block-step grid so synchronizations keep
            // covering the whole system.
            let relic = &mut cluster.particles[second];
            relic.mass = 0.;
            relic.position = com_position;
            relic.velocity = com_velocity;
            relic.predicted_position = com_position;
            relic.predicted_velocity = com_velocity;
            relic.forces.zero();
            relic.old_forces.zero();
            relic.a2.zero();
            relic.a3.zero();
            relic.current_time = itime;
            relic.time_step = D_TIME_MIN;
        }

        evaluate_pair(&mut members);
        let time_step = initial_time_step(&members);
        let initial_energy = internal_energy(&members);

        MultipleSystem {
            members,
            time: itime,
            time_step,
            initial_energy,
            tidal_work: 0.,
            flagged: false,
        }
    }

    pub fn separation(&self) -> f64 {
        Axes::difference(&self.members[1].position, &self.members[0].position).norm()
    }

    /// Current internal energy of the pair (kinetic in the relative motion
    /// plus the mutual potential).
    pub fn energy(&self) -> f64 {
        internal_energy(&self.members)
    }

    /// Refreshes the differential tidal acceleration of both members from
    /// the rest of the system. The leading-order (uniform) part of the
    /// external field acts on the center of mass through the ghost and
    /// cancels in the relative motion; only the gradient is kept here.
    pub fn update_perturbation(&mut self, cluster: &Cluster) {
        let com = &cluster.particles[self.members[0].id];
        let com_field = external_field(cluster, &com.position, self.members);
        for k in 0..2 {
            let mut absolute = com.position;
            absolute.add(&self.members[k].position);
            let field = external_field(cluster, &absolute, self.members);
            self.members[k].perturbation = Axes::difference(&field, &com_field);
        }
    }

    /// Sub-cycles the internal integrator until the pair reaches
    /// `sync_time` on its own time grid.
    pub fn advance(&mut self, sync_time: f64) {
        while self.time < sync_time {
            let remaining = sync_time - self.time;
            if self.time_step >= remaining {
                // The closing step is truncated to land exactly on the
                // synchronization time; the natural step survives it.
                let natural = self.time_step;
                self.step(remaining);
                self.time = sync_time;
                self.time_step = natural;
            } else {
                let dt = self.time_step;
                self.step(dt);
                self.time += dt;
            }
        }
    }

    /// One time-symmetric Hermite step of length `dt`: predict, then
    /// iterate the corrector until the energy change per pass falls below
    /// the elliptical/hyperbolic tolerance, up to KEPLER_ITE passes.
    fn step(&mut self, dt: f64) {
        for member in self.members.iter_mut() {
            member.old_forces.copy_from(&member.forces);
        }

        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt2 * dt2;
        let dt5 = dt4 * dt;

        // Predictor, kept fixed across corrector passes.
        let mut predicted = [(Axes::new(), Axes::new()); 2];
        for (k, member) in self.members.iter_mut().enumerate() {
            let mut position = member.position;
            position.addmul(dt, &member.velocity);
            position.addmul(dt2 / 2., &member.forces.a);
            position.addmul(dt3 / 6., &member.forces.a1);
            let mut velocity = member.velocity;
            velocity.addmul(dt, &member.forces.a);
            velocity.addmul(dt2 / 2., &member.forces.a1);
            predicted[k] = (position, velocity);
            member.position = position;
            member.velocity = velocity;
        }

        let mut last_energy = internal_energy(&self.members);
        let mut last_delta = f64::INFINITY;
        let mut converged = false;
        for iteration in 0..KEPLER_ITE {
            evaluate_pair(&mut self.members);

            for (k, member) in self.members.iter_mut().enumerate() {
                let a0 = &member.old_forces.a;
                let a1 = &member.forces.a;
                let j0 = &member.old_forces.a1;
                let j1 = &member.forces.a1;

                let mut a2 = Axes::new();
                a2.addmul(-6. / dt2, &Axes::difference(a0, a1));
                a2.addmul(-4. / dt, j0);
                a2.addmul(-2. / dt, j1);
                let mut a3 = Axes::new();
                a3.addmul(12. / dt3, &Axes::difference(a0, a1));
                a3.addmul(6. / dt2, j0);
                a3.addmul(6. / dt2, j1);

                let (mut position, mut velocity) = predicted[k];
                position.addmul(dt4 / 24., &a2);
                position.addmul(dt5 / 120., &a3);
                velocity.addmul(dt3 / 6., &a2);
                velocity.addmul(dt4 / 24., &a3);

                member.position = position;
                member.velocity = velocity;
                member.a2 = a2;
                member.a3 = a3;
            }

            let energy = internal_energy(&self.members);
            let tolerance = if energy < 0. { DEL_E } else { DEL_E_HYP };
            let delta = (energy - last_energy).abs();
            if delta <= tolerance * energy.abs() {
                converged = true;
                break;
            }
            // Once the iterate oscillates at round-off level, further
            // passes cannot improve it.
            if iteration >= 2 && delta >= last_delta {
                converged = true;
                break;
            }
            last_delta = delta;
            last_energy = energy;
        }
        if !converged {
            self.flagged = true;
        }

        // Work done by the tidal field on the internal degrees of freedom.
        for member in &self.members {
            self.tidal_work += member.mass * member.perturbation.dot(&member.velocity) * dt;
        }

        self.time_step = next_time_step(&self.members, dt);
    }

    /// Termination: undoes the center-of-mass mapping, restoring two
    /// independent particles. Forces inherit the ghost's field plus the
    /// internal pair term; both slots restart on the minimum block step so
    /// they re-enter the scheduler cleanly.
    pub fn restore(&self, cluster: &mut Cluster) {
        let ghost = cluster.particles[self.members[0].id];

        for member in self.members.iter() {
            let particle = &mut cluster.particles[member.id];
            let mut position = ghost.position;
            position.add(&member.position);
            let mut velocity = ghost.velocity;
            velocity.add(&member.velocity);
            let mut forces = ghost.forces;
            forces.add(&member.forces);

            particle.mass = member.mass;
            particle.position = position;
            particle.velocity = velocity;
            particle.predicted_position = position;
            particle.predicted_velocity = velocity;
            particle.forces = forces;
            particle.old_forces = forces;
            particle.a2.zero();
            particle.a3.zero();
            particle.current_time = ghost.current_time;
            particle.time_step = D_TIME_MIN;
        }
    }
}

/// One-on-one Hermite pair force in the center-of-mass frame, unsoftened
/// (the regularized regime), plus the per-member tidal term.
fn evaluate_pair(members: &mut [Member; 2]) {
    let r01 = Axes::difference(&members[1].position, &members[0].position);
    let v01 = Axes::difference(&members[1].velocity, &members[0].velocity);
    let r2 = r01.norm_2();
    let r_inv = 1. / r2.sqrt();
    let r2_inv = r_inv * r_inv;
    let r3_inv = r_inv * r2_inv;
    let rv = r01.dot(&v01);

    for k in 0..2 {
        let other_mass = members[1 - k].mass;
        let sign = if k == 0 { 1. } else { -1. };
        let mut forces = Forces::new();
        forces.a.addmul(sign * G * other_mass * r3_inv, &r01);
        forces.a1.addmul(sign * G * other_mass * r3_inv, &v01);
        forces
            .a1
            .addmul(-3. * sign * G * other_mass * rv * r3_inv * r2_inv, &r01);
        forces.a.add(&members[k].perturbation);
        members[k].forces = forces;
    }
}

fn internal_energy(members: &[Member; 2]) -> f64 {
    let r01 = Axes::difference(&members[1].position, &members[0].position);
    let v01 = Axes::difference(&members[1].velocity, &members[0].velocity);
    let m0 = members[0].mass;
    let m1 = members[1].mass;
    let mu = m0 * m1 / (m0 + m1);
    0.5 * mu * v01.norm_2() - G * m0 * m1 / r01.norm()
}

/// First internal step from the acceleration/jerk ratio of the tighter
/// member, the same recipe used for the global initialization.
fn initial_time_step(members: &[Member; 2]) -> f64 {
    let mut dt = f64::INFINITY;
    for member in members {
        let a = member.forces.a.norm();
        let a1 = member.forces.a1.norm();
        if a1 > 0. {
            dt = dt.min(ETA_S * a / a1);
        }
    }
    if !dt.is_finite() {
        dt = D_TIME_MIN;
    }
    dt
}

/// Aarseth step for the internal grid; the internal grid is private to the
/// pair, so no power-of-two quantization is needed. Kept within a factor of
/// two of the previous step for time symmetry.
fn next_time_step(members: &[Member; 2], dt: f64) -> f64 {
    let mut new_dt = f64::INFINITY;
    for member in members {
        let mut a2_next = member.a2;
        a2_next.addmul(dt, &member.a3);
        let a = member.forces.a.norm();
        let a1 = member.forces.a1.norm();
        let a2 = a2_next.norm();
        let a3 = member.a3.norm();
        let denominator = a1 * a3 + a2 * a2;
        if denominator > 0. {
            let candidate = (ETA_N * (a * a2 + a1 * a1) / denominator).sqrt();
            new_dt = new_dt.min(candidate);
        }
    }
    if !new_dt.is_finite() {
        return dt;
    }
    new_dt.clamp(dt / 2., dt * 2.)
}

/// External acceleration at `point` from every massive particle outside the
/// pair.
fn external_field(cluster: &Cluster, point: &Axes, members: [Member; 2]) -> Axes {
    let mut field = Axes::new();
    for particle in &cluster.particles {
        if particle.is_massless()
            || particle.id == members[0].id
            || particle.id == members[1].id
        {
            continue;
        }
        let rij = Axes::difference(&particle.position, point);
        let r2 = rij.norm_2() + cluster.softening_2;
        let r_inv = 1. / r2.sqrt();
        field.addmul(G * particle.mass * r_inv * r_inv * r_inv, &rij);
    }
    field
}
