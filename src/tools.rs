use rayon::prelude::*;

use crate::constants::{CORE_MASS, G, J_NEIGHBOUR, OSTEPS, PI};
use crate::particles::{Axes, Cluster};

/// Virial radius from the total mass and total energy of a bound system.
pub fn virial_radius(total_mass: f64, energy: f64) -> f64 {
    (-G * total_mass * total_mass) / (4. * energy)
}

/// Crossing time of the system at its virial radius.
pub fn crossing_time(r_virial: f64, total_mass: f64) -> f64 {
    let rv3 = r_virial * r_virial * r_virial;
    2. * 2.0_f64.sqrt() * (rv3 / (G * total_mass)).sqrt()
}

/// Close-encounter radius: pairs closer than this are binary candidates.
pub fn close_encounter_radius(r_virial: f64, n: usize) -> f64 {
    4. * r_virial / n as f64
}

/// Time-step scale associated to the close-encounter radius.
pub fn close_encounter_time_step(r_cl: f64, n: usize) -> f64 {
    let r_cl3 = r_cl * r_cl * r_cl;
    0.04 * (r_cl3 * n as f64).sqrt()
}

/// Half-mass relaxation time (Spitzer 1987), with the Coulomb logarithm
/// ln(0.11 N) independent of the softening.
pub fn half_mass_relaxation_time(n: usize, r_half_mass: f64, total_mass: f64) -> f64 {
    let n_f = n as f64;
    let rh3 = r_half_mass * r_half_mass * r_half_mass;
    let a = (n_f * rh3 / (G * (total_mass / n_f))).sqrt();
    let b = 1. / (0.11 * n_f).ln();
    0.138 * a * b
}

/// Center of density: density-weighted mean of the positions, where the
/// per-particle density comes from the distance to the J-th nearest
/// neighbour (Casertano & Hut 1985). Falls back to the center of mass when
/// the system is too small for the J-th neighbour estimate.
pub fn center_of_density(cluster: &Cluster) -> Axes {
    let n = cluster.n;
    if n <= J_NEIGHBOUR {
        return center_of_mass(cluster);
    }

    let particles = &cluster.particles;
    let densities: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut distances: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    Axes::difference(&particles[j].position, &particles[i].position).norm()
                })
                .collect();
            distances.sort_by(|a, b| a.partial_cmp(b).unwrap());
            // The sphere through the J-th neighbour encloses J - 1 bodies.
            let radius = distances[J_NEIGHBOUR - 1];
            let volume = 4. * PI * radius * radius * radius / 3.;
            (J_NEIGHBOUR - 1) as f64 * particles[i].mass / volume
        })
        .collect();

    let mut center = Axes::new();
    let mut weight = 0.;
    for (particle, density) in particles.iter().zip(densities.iter()) {
        center.addmul(*density, &particle.position);
        weight += density;
    }
    center.mul(1. / weight);
    center
}

fn center_of_mass(cluster: &Cluster) -> Axes {
    let mut center = Axes::new();
    for particle in &cluster.particles {
        center.addmul(particle.mass, &particle.position);
    }
    center.mul(1. / cluster.total_mass);
    center
}

/// Distances to `center`, sorted ascending, paired with the particle index.
fn sorted_radii(cluster: &Cluster, center: &Axes) -> Vec<(f64, usize)> {
    let mut radii: Vec<(f64, usize)> = cluster
        .particles
        .par_iter()
        .enumerate()
        .map(|(i, p)| (Axes::difference(&p.position, center).norm(), i))
        .collect();
    radii.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    radii
}

/// Smallest radius around the center of density containing at least half of
/// the total mass.
pub fn half_mass_radius(cluster: &Cluster, center: &Axes) -> f64 {
    let radii = sorted_radii(cluster, center);
    let mut cumulative = 0.;
    for &(radius, index) in &radii {
        cumulative += cluster.particles[index].mass;
        if cumulative >= cluster.total_mass / 2. {
            return radius;
        }
    }
    radii.last().map(|&(r, _)| r).unwrap_or(0.)
}

/// Core radius: radius enclosing the CORE_MASS fraction of the total mass.
pub fn core_radius(cluster: &Cluster, center: &Axes) -> f64 {
    let radii = sorted_radii(cluster, center);
    let mut cumulative = 0.;
    for &(radius, index) in &radii {
        cumulative += cluster.particles[index].mass;
        if cumulative > cluster.total_mass * CORE_MASS {
            return radius;
        }
    }
    radii.last().map(|&(r, _)| r).unwrap_or(0.)
}

/// Lagrange radii at cumulative mass fractions ratio, 2 ratio, ... up to the
/// whole system, measured from the center of density.
pub fn lagrange_radii(cluster: &Cluster, ratio: f64) -> Vec<f64> {
    let center = center_of_density(cluster);
    let radii = sorted_radii(cluster, &center);

    let shells = (1. / ratio).round() as usize;
    let mut layers = Vec::with_capacity(shells);
    let mut cumulative = 0.;
    let mut layer = 1;
    for &(radius, index) in &radii {
        cumulative += cluster.particles[index].mass;
        while layer <= shells && cumulative >= ratio * layer as f64 * cluster.total_mass {
            layers.push(radius);
            layer += 1;
        }
    }
    while layers.len() < shells {
        layers.push(radii.last().map(|&(r, _)| r).unwrap_or(0.));
    }
    layers
}

/// Recomputes the global attribute block from the current state and the
/// initial energy. Called once after the first force evaluation.
pub fn compute_attributes(cluster: &mut Cluster) {
    let energy = cluster.energies.initial;
    let center = center_of_density(cluster);
    let r_half_mass = half_mass_radius(cluster, &center);

    // The virial-radius family only makes sense for bound systems; an
    // unbound input keeps the close-encounter machinery switched off.
    if energy < 0. {
        let r_virial = virial_radius(cluster.total_mass, energy);
        cluster.attributes.r_virial = r_virial;
        cluster.attributes.t_crossing = crossing_time(r_virial, cluster.total_mass);
        cluster.attributes.r_cl = close_encounter_radius(r_virial, cluster.n);
        cluster.attributes.dt_cl = close_encounter_time_step(cluster.attributes.r_cl, cluster.n);
    } else {
        cluster.attributes.r_virial = 0.;
        cluster.attributes.t_crossing = 0.;
        cluster.attributes.r_cl = 0.;
        cluster.attributes.dt_cl = 0.;
    }
    cluster.attributes.r_core = core_radius(cluster, &center);
    cluster.attributes.r_half_mass = r_half_mass;
    cluster.attributes.t_relaxation =
        half_mass_relaxation_time(cluster.n, r_half_mass, cluster.total_mass);
}

/// Distribution of the current block steps as (step, count) pairs, largest
/// step first, capped at OSTEPS bins.
pub fn time_step_distribution(cluster: &Cluster) -> Vec<(f64, usize)> {
    let mut bins: Vec<(f64, usize)> = Vec::new();
    for particle in &cluster.particles {
        match bins.iter_mut().find(|(step, _)| *step == particle.time_step) {
            Some((_, count)) => *count += 1,
            None => bins.push((particle.time_step, 1)),
        }
    }
    bins.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    bins.truncate(OSTEPS);
    bins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::Particle;

    fn uniform_line(n: usize) -> Cluster {
        let particles = (0..n)
            .map(|i| Particle::new(i, 1., Axes::from(i as f64, 0., 0.), Axes::new()))
            .collect();
        Cluster::new(particles, 0.).unwrap()
    }

    #[test]
    fn virial_radius_of_circular_pair() {
        // M = 1, E = -0.125 gives R_v = 2.
        assert!((virial_radius(1., -0.125) - 2.).abs() < 1e-15);
        assert!((close_encounter_radius(2., 2) - 4.).abs() < 1e-15);
    }

    #[test]
    fn half_mass_radius_on_a_line() {
        let cluster = uniform_line(8);
        let center = Axes::from(0., 0., 0.);
        // Cumulative mass reaches 4 (half of 8) at the particle at x = 3.
        assert!((half_mass_radius(&cluster, &center) - 3.).abs() < 1e-15);
    }

    #[test]
    fn lagrange_radii_are_monotonic() {
        let cluster = uniform_line(20);
        let layers = lagrange_radii(&cluster, 0.25);
        assert_eq!(layers.len(), 4);
        for pair in layers.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        // The line is symmetric around x = 9.5, so the outermost shell ends
        // at the half-length of the line.
        assert!((layers[3] - 9.5).abs() < 1e-9);
    }

    #[test]
    fn center_of_density_of_symmetric_pairing() {
        // A dense clump around the origin plus a distant sparse tail: the
        // center of density must stay near the clump.
        let mut particles: Vec<Particle> = (0..12)
            .map(|i| {
                let offset = 0.01 * (i as f64 - 5.5);
                Particle::new(i, 1., Axes::from(offset, 0., 0.), Axes::new())
            })
            .collect();
        particles.push(Particle::new(12, 1., Axes::from(50., 0., 0.), Axes::new()));
        let cluster = Cluster::new(particles, 0.).unwrap();
        let center = center_of_density(&cluster);
        assert!(center.x.abs() < 1.);
    }

    #[test]
    fn step_distribution_counts_particles() {
        let mut cluster = uniform_line(4);
        cluster.particles[0].time_step = 0.125;
        cluster.particles[1].time_step = 0.0625;
        cluster.particles[2].time_step = 0.0625;
        cluster.particles[3].time_step = 0.03125;
        let bins = time_step_distribution(&cluster);
        assert_eq!(bins, vec![(0.125, 1), (0.0625, 2), (0.03125, 1)]);
    }
}
