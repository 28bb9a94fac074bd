pub mod constants;

mod particles;
pub use self::particles::Axes;
pub use self::particles::Cluster;
pub use self::particles::ClusterAttributes;
pub use self::particles::Energies;
pub use self::particles::Forces;
pub use self::particles::Particle;

mod errors;
pub use self::errors::InitError;

mod gravity;
pub use self::gravity::CpuKernel;
pub use self::gravity::GravityKernel;
pub use self::gravity::TargetForces;

mod encounters;
pub use self::encounters::detect_pairs;
pub use self::encounters::PairCandidate;

mod multiples;
pub use self::multiples::Member;
pub use self::multiples::MultipleSystem;

mod integrator;
pub use self::integrator::*;

pub mod tools;
