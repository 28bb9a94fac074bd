use hyades::{Axes, OutputSink, Particle};
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Equal-mass pair on a circular orbit of separation 1: E = -0.125 and
/// period 2 pi in N-body units.
#[allow(dead_code)]
pub fn two_body_circular() -> Vec<Particle> {
    vec![
        Particle::new(0, 0.5, Axes::from(-0.5, 0., 0.), Axes::from(0., -0.5, 0.)),
        Particle::new(1, 0.5, Axes::from(0.5, 0., 0.), Axes::from(0., 0.5, 0.)),
    ]
}

/// Chenciner & Montgomery figure-eight choreography; the period is
/// T = 6.32591398.
#[allow(dead_code)]
pub fn figure_eight() -> Vec<Particle> {
    let r1 = Axes::from(0.97000436, -0.24308753, 0.);
    let r2 = Axes::from(-0.97000436, 0.24308753, 0.);
    let r3 = Axes::from(0., 0., 0.);
    let v3 = Axes::from(-0.93240737, -0.86473146, 0.);
    let v1 = Axes::from(-v3.x / 2., -v3.y / 2., 0.);
    vec![
        Particle::new(0, 1., r1, v1),
        Particle::new(1, 1., r2, v1),
        Particle::new(2, 1., r3, v3),
    ]
}

#[allow(dead_code)]
pub const FIGURE_EIGHT_PERIOD: f64 = 6.32591398;

/// Plummer sphere in standard N-body units (M = 1, E = -1/4), sampled with
/// the classic inversion/rejection recipe and recentered on the center of
/// mass. The seed makes runs reproducible.
#[allow(dead_code)]
pub fn plummer(n: usize, seed: u64) -> Vec<Particle> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mass = 1. / n as f64;
    // Conversion from Plummer natural units (scale radius 1) to standard
    // units where E = -1/4.
    let length_scale = 3. * std::f64::consts::PI / 16.;
    let velocity_scale = 1. / length_scale.sqrt();

    let mut particles = Vec::with_capacity(n);
    for i in 0..n {
        // Radius by inverting the cumulative mass profile, cut at 10 scale
        // radii to keep the model compact.
        let radius = loop {
            let x: f64 = rng.gen_range(1e-10..1.0);
            let r = (x.powf(-2. / 3.) - 1.).powf(-0.5);
            if r < 10. {
                break r;
            }
        };
        let position = isotropic(&mut rng, radius);

        // Speed from the distribution q^2 (1 - q^2)^(7/2) by rejection.
        let q = loop {
            let q: f64 = rng.gen_range(0.0..1.0);
            let y: f64 = rng.gen_range(0.0..0.1);
            if y < q * q * (1. - q * q).powf(3.5) {
                break q;
            }
        };
        let escape_speed = 2f64.sqrt() * (1. + radius * radius).powf(-0.25);
        let velocity = isotropic(&mut rng, q * escape_speed);

        let mut position = position;
        position.mul(length_scale);
        let mut velocity = velocity;
        velocity.mul(velocity_scale);
        particles.push(Particle::new(i, mass, position, velocity));
    }

    // Remove the center-of-mass offset and drift.
    let mut com_position = Axes::new();
    let mut com_velocity = Axes::new();
    for particle in &particles {
        com_position.addmul(particle.mass, &particle.position);
        com_velocity.addmul(particle.mass, &particle.velocity);
    }
    for particle in particles.iter_mut() {
        particle.position.sub(&com_position);
        particle.velocity.sub(&com_velocity);
    }
    particles
}

fn isotropic(rng: &mut ChaCha8Rng, magnitude: f64) -> Axes {
    let z: f64 = rng.gen_range(-1.0..1.0);
    let phi: f64 = rng.gen_range(0.0..(2. * std::f64::consts::PI));
    let s = (1. - z * z).sqrt();
    Axes::from(
        magnitude * s * phi.cos(),
        magnitude * s * phi.sin(),
        magnitude * z,
    )
}

/// Sink that remembers every energy-log line; tests read the trace instead
/// of stdout.
#[allow(dead_code)]
#[derive(Default)]
pub struct Recorder {
    pub energies: Vec<(f64, f64)>,
    pub warnings: Vec<String>,
}

impl OutputSink for Recorder {
    fn energy_log(
        &mut self,
        time: f64,
        _iterations: u64,
        _interactions: u64,
        _nsteps: u64,
        energy: f64,
    ) {
        self.energies.push((time, energy));
    }

    fn warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }
}
