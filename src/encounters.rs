use crate::constants::G;
use crate::particles::{Axes, Cluster};

/// A bound pair proposed by the close-encounter scan, with its two-body
/// relative energy. More negative means more tightly bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairCandidate {
    pub first: usize,
    pub second: usize,
    pub energy: f64,
}

/// Two-body relative energy of (i, j) at the predicted state:
/// e = mu v_rel^2 / 2 - G m_i m_j / r with mu the reduced mass.
fn relative_energy(cluster: &Cluster, i: usize, j: usize) -> f64 {
    let pi = &cluster.particles[i];
    let pj = &cluster.particles[j];
    let rij = Axes::difference(&pj.predicted_position, &pi.predicted_position);
    let vij = Axes::difference(&pj.predicted_velocity, &pi.predicted_velocity);
    let mu = pi.mass * pj.mass / (pi.mass + pj.mass);
    0.5 * mu * vij.norm_2() - G * pi.mass * pj.mass / rij.norm()
}

/// Scans the neighbour lists of the active set for bound pairs inside the
/// close-encounter radius. Pairs touching an existing multiple system
/// (`in_system`) or a massless relic are ignored; when one particle shows
/// up in several candidates, the most bound pair wins. Each surviving pair
/// is reported exactly once.
pub fn detect_pairs(cluster: &Cluster, active: &[usize], in_system: &[bool]) -> Vec<PairCandidate> {
    let r_cl = cluster.attributes.r_cl;
    let mut candidates: Vec<PairCandidate> = Vec::new();

    for &i in active {
        let pi = &cluster.particles[i];
        if pi.is_massless() || in_system[i] {
            continue;
        }
        for &j in &cluster.neighbours[i] {
            let pj = &cluster.particles[j];
            if pj.is_massless() || in_system[j] {
                continue;
            }
            let (a, b) = if i < j { (i, j) } else { (j, i) };
            if candidates.iter().any(|c| c.first == a && c.second == b) {
                continue;
            }
            let separation =
                Axes::difference(&pj.predicted_position, &pi.predicted_position).norm();
            if separation > r_cl {
                continue;
            }
            let energy = relative_energy(cluster, a, b);
            if energy < 0. {
                candidates.push(PairCandidate { first: a, second: b, energy });
            }
        }
    }

    // Resolve shared members in favour of the most bound pair.
    candidates.sort_by(|a, b| a.energy.partial_cmp(&b.energy).unwrap());
    let mut taken = vec![false; cluster.n];
    let mut pairs = Vec::new();
    for candidate in candidates {
        if taken[candidate.first] || taken[candidate.second] {
            continue;
        }
        taken[candidate.first] = true;
        taken[candidate.second] = true;
        pairs.push(candidate);
    }
    pairs
}
