pub const PI: f64 = std::f64::consts::PI;
pub const TWO_PI: f64 = 2. * PI;

/// Gravitational constant in N-body units.
pub const G: f64 = 1.;

/// Time-step limits for the block time-step scheme.
///
/// Both limits are powers of two so that the individual time grids of all
/// particles stay commensurate and synchronization times coincide exactly.
pub const D_TIME_MIN: f64 = 1.1920928955078125e-07; // 2^-23
pub const D_TIME_MAX: f64 = 0.125; // 2^-3

/// Default softening parameter (squared) of the global force kernel.
pub const E2: f64 = 1e-8;

/// ETA_S fixes the first time-step of every particle from the initial
/// acceleration/jerk ratio.
pub const ETA_S: f64 = 0.01;

/// ETA_N drives the per-particle time-step refinement after every
/// correction, following equation (7) of Makino & Aarseth (1992).
pub const ETA_N: f64 = 0.01;

/// Neighbour rank used by the density estimator of the center of density
/// (Casertano & Hut 1985).
pub const J_NEIGHBOUR: usize = 10;

/// Maximum number of bins when reporting the initial time-step distribution.
pub const OSTEPS: usize = 50;

/// Cumulative mass fraction that defines the core radius.
pub const CORE_MASS: f64 = 0.2;

/// Default mass-fraction spacing of the Lagrange shells.
pub const LAGRANGE_RATIO: f64 = 0.05;

/// Maximum number of corrector passes of the time-symmetric pair integrator.
pub const KEPLER_ITE: u32 = 50;

/// Convergence tolerances of the time-symmetric corrector, as relative
/// energy change per pass: bound (elliptical) and unbound excursions.
pub const DEL_E: f64 = 9.0e-16;
pub const DEL_E_HYP: f64 = 2.0e-15;

/// Step underflows tolerated per particle before a warning is emitted.
pub const UNDERFLOW_WARNING_LIMIT: u32 = 32;
