use rayon::prelude::*;

use crate::particles::{Axes, Cluster, Forces};

/// Result of one force evaluation on a single target: the new
/// (acceleration, jerk) pair plus the neighbours found inside the target's
/// neighbour sphere while summing.
#[derive(Debug, Clone)]
pub struct TargetForces {
    pub target: usize,
    pub forces: Forces,
    pub neighbours: Vec<usize>,
}

/// Capability set of a force back-end. The CPU kernel below is the only
/// implementation shipped with the crate; accelerated back-ends plug in
/// through this trait.
pub trait GravityKernel: Send + Sync {
    /// Evaluates (a, jerk) on every target at its predicted state from all
    /// massive sources. Targets are owned disjointly by the workers; sources
    /// are only read.
    fn evaluate(&self, targets: &[usize], cluster: &Cluster) -> Vec<TargetForces>;
}

/// Direct-summation CPU kernel with Plummer softening. Embarrassingly
/// parallel over targets; the reduction over sources is sequential per
/// target, which keeps the sums deterministic at any thread count.
pub struct CpuKernel;

impl CpuKernel {
    fn forces_on(&self, i: usize, cluster: &Cluster) -> TargetForces {
        let particles = &cluster.particles;
        let e2 = cluster.softening_2;
        let pi = &particles[i];
        let r_sphere_2 = pi.neighbour_radius * pi.neighbour_radius;

        let mut forces = Forces::new();
        let mut neighbours = Vec::new();

        for (j, pj) in particles.iter().enumerate() {
            if j == i || pj.is_massless() {
                continue;
            }

            let rij = Axes::difference(&pj.predicted_position, &pi.predicted_position);
            let vij = Axes::difference(&pj.predicted_velocity, &pi.predicted_velocity);

            let r2 = rij.norm_2() + e2;
            let r_inv = 1. / r2.sqrt();
            let r2_inv = r_inv * r_inv;
            let mr3_inv = pj.mass * r_inv * r2_inv;
            let rv = rij.dot(&vij);

            forces.a.addmul(mr3_inv, &rij);
            forces.a1.addmul(mr3_inv, &vij);
            forces.a1.addmul(-3. * rv * mr3_inv * r2_inv, &rij);

            if rij.norm_2() <= r_sphere_2 {
                neighbours.push(j);
            }
        }

        TargetForces { target: i, forces, neighbours }
    }
}

impl GravityKernel for CpuKernel {
    fn evaluate(&self, targets: &[usize], cluster: &Cluster) -> Vec<TargetForces> {
        targets
            .par_iter()
            .map(|&i| self.forces_on(i, cluster))
            .collect()
    }
}
