use serde::{Deserialize, Serialize};

use super::Axes;
use crate::constants::D_TIME_MAX;

/// Force felt by one particle: acceleration and its first derivative (jerk).
#[derive(Debug, Default, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forces {
    pub a: Axes,
    pub a1: Axes,
}

impl Forces {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn copy_from(&mut self, other: &Self) {
        self.a.copy_from(&other.a);
        self.a1.copy_from(&other.a1);
    }

    #[inline(always)]
    pub fn add(&mut self, other: &Self) {
        self.a.add(&other.a);
        self.a1.add(&other.a1);
    }

    #[inline(always)]
    pub fn zero(&mut self) {
        self.a.zero();
        self.a1.zero();
    }
}

/// One record of the particle state store.
///
/// Positions/velocities are the corrected values at `current_time`; the
/// predicted pair is refreshed for every particle at each integration time
/// and consumed by the force kernel and the corrector. `forces` holds the
/// latest evaluated (a, jerk), `old_forces` the pair saved at the beginning
/// of the particle's step, and `a2`/`a3` the higher derivatives
/// reconstructed by the Hermite corrector.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Particle {
    pub id: usize,
    pub mass: f64,
    pub position: Axes,
    pub velocity: Axes,
    pub predicted_position: Axes,
    pub predicted_velocity: Axes,
    pub forces: Forces,
    pub old_forces: Forces,
    pub a2: Axes,
    pub a3: Axes,
    /// Local time of the last correction.
    pub current_time: f64,
    /// Current block step, a power of two in [D_TIME_MIN, D_TIME_MAX].
    pub time_step: f64,
    /// Radius of the neighbour sphere used for close-encounter candidates.
    pub neighbour_radius: f64,
}

impl Particle {
    pub fn new(id: usize, mass: f64, position: Axes, velocity: Axes) -> Particle {
        Particle {
            id,
            mass,
            position,
            velocity,
            predicted_position: position,
            predicted_velocity: velocity,
            forces: Forces::new(),
            old_forces: Forces::new(),
            a2: Axes::new(),
            a3: Axes::new(),
            current_time: 0.,
            time_step: D_TIME_MAX,
            neighbour_radius: 0.,
        }
    }

    #[inline(always)]
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.norm_2()
    }

    /// Zero-mass slots are ghost relics: they are never force targets nor
    /// sources and do not take part in encounter detection.
    #[inline(always)]
    pub fn is_massless(&self) -> bool {
        self.mass == 0.
    }
}
