use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Axes, Particle};
use crate::errors::InitError;

/// Energy bookkeeping of the cluster. `initial` is fixed right after the
/// first force evaluation and used for drift reporting; `previous` keeps the
/// value of the last synchronization.
#[derive(Debug, Default, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Energies {
    pub kinetic: f64,
    pub potential: f64,
    pub initial: f64,
    pub previous: f64,
}

/// Global attributes derived from the initial state, kept for the whole
/// integration: close-encounter detection and the diagnostics report are
/// driven by these scales.
#[derive(Debug, Default, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterAttributes {
    pub r_virial: f64,
    /// Close-encounter radius, 4 r_virial / n.
    pub r_cl: f64,
    /// Close-encounter time step, 0.04 sqrt(r_cl^3 n).
    pub dt_cl: f64,
    pub r_core: f64,
    pub r_half_mass: f64,
    pub t_crossing: f64,
    pub t_relaxation: f64,
}

/// State store of the integrator. Owns every per-particle record and the
/// global scalars; the integrator borrows it mutably for the duration of a
/// step and the force kernel reads it while evaluating the active targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub particles: Vec<Particle>,
    pub n: usize,
    pub total_mass: f64,
    /// Softening parameter squared of the global force kernel.
    pub softening_2: f64,
    pub energies: Energies,
    pub attributes: ClusterAttributes,
    /// Neighbour lists keyed by target, refreshed by the force kernel.
    pub neighbours: Vec<Vec<usize>>,
}

impl Cluster {
    /// Builds the state store from initial conditions, failing fast on
    /// unusable input (empty set, non-finite values, negative masses).
    pub fn new(particles: Vec<Particle>, softening_2: f64) -> Result<Cluster, InitError> {
        if particles.is_empty() {
            return Err(InitError::EmptyCluster);
        }
        if !softening_2.is_finite() || softening_2 < 0. {
            return Err(InitError::InvalidSoftening { value: softening_2 });
        }
        for (i, particle) in particles.iter().enumerate() {
            if !particle.mass.is_finite() {
                return Err(InitError::NonFinite { id: i, quantity: "mass" });
            }
            if particle.mass < 0. {
                return Err(InitError::NegativeMass { id: i, mass: particle.mass });
            }
            if !(particle.position.x.is_finite()
                && particle.position.y.is_finite()
                && particle.position.z.is_finite())
            {
                return Err(InitError::NonFinite { id: i, quantity: "position" });
            }
            if !(particle.velocity.x.is_finite()
                && particle.velocity.y.is_finite()
                && particle.velocity.z.is_finite())
            {
                return Err(InitError::NonFinite { id: i, quantity: "velocity" });
            }
        }

        let n = particles.len();
        let total_mass = particles.iter().map(|p| p.mass).sum();
        let mut particles = particles;
        for (i, particle) in particles.iter_mut().enumerate() {
            particle.id = i;
        }

        Ok(Cluster {
            particles,
            n,
            total_mass,
            softening_2,
            energies: Energies::default(),
            attributes: ClusterAttributes::default(),
            neighbours: vec![Vec::new(); n],
        })
    }

    /// Kinetic energy of the whole system. Partial terms are computed in
    /// parallel and reduced in index order, so the sum is deterministic.
    pub fn kinetic_energy(&self) -> f64 {
        self.particles
            .par_iter()
            .map(|p| p.kinetic_energy())
            .collect::<Vec<_>>()
            .into_iter()
            .sum()
    }

    /// Unsoftened pairwise potential energy (diagnostic form).
    pub fn potential_energy(&self) -> f64 {
        let particles = &self.particles;
        (0..self.n)
            .into_par_iter()
            .map(|i| {
                let pi = &particles[i];
                if pi.is_massless() {
                    return 0.;
                }
                let mut epot = 0.;
                for pj in &particles[i + 1..] {
                    if pj.is_massless() {
                        continue;
                    }
                    let rij = Axes::difference(&pj.position, &pi.position);
                    epot -= pi.mass * pj.mass / rij.norm();
                }
                epot
            })
            .collect::<Vec<_>>()
            .into_iter()
            .sum()
    }

    /// Total energy, storing the kinetic/potential terms. `external` carries
    /// the internal energies of multiple systems hidden behind their ghost
    /// center-of-mass particles.
    pub fn compute_energy(&mut self, external: f64) -> f64 {
        self.energies.kinetic = self.kinetic_energy();
        self.energies.potential = self.potential_energy();
        self.energies.kinetic + self.energies.potential + external
    }

    pub fn momentum(&self) -> Axes {
        let mut momentum = Axes::new();
        for particle in &self.particles {
            momentum.addmul(particle.mass, &particle.velocity);
        }
        momentum
    }

    /// Predicts every particle at `itime` with the third-order Taylor series
    /// in the last evaluated acceleration and jerk.
    pub fn predict(&mut self, itime: f64) {
        for particle in self.particles.iter_mut() {
            let dt = itime - particle.current_time;
            let dt2 = dt * dt / 2.;
            let dt3 = dt2 * dt / 3.;

            let mut position = particle.position;
            position.addmul(dt, &particle.velocity);
            position.addmul(dt2, &particle.forces.a);
            position.addmul(dt3, &particle.forces.a1);
            particle.predicted_position = position;

            let mut velocity = particle.velocity;
            velocity.addmul(dt, &particle.forces.a);
            velocity.addmul(dt2, &particle.forces.a1);
            particle.predicted_velocity = velocity;
        }
    }

    /// Saves the (a, jerk) pair of the active particles for the corrector.
    pub fn save_old_forces(&mut self, active: &[usize]) {
        for &i in active {
            let forces = self.particles[i].forces;
            self.particles[i].old_forces.copy_from(&forces);
        }
    }

    /// Next integration time: the earliest t_i + dt_i over the system.
    pub fn next_integration_time(&self) -> f64 {
        self.particles
            .iter()
            .map(|p| p.current_time + p.time_step)
            .fold(f64::INFINITY, f64::min)
    }

    /// Fills `active` with the particles whose step ends exactly at `itime`.
    /// Exact equality is guaranteed by the power-of-two step discipline.
    pub fn find_active(&self, itime: f64, active: &mut Vec<usize>) {
        active.clear();
        for (i, particle) in self.particles.iter().enumerate() {
            if particle.current_time + particle.time_step == itime {
                active.push(i);
            }
        }
    }
}
