mod hermite4;
pub mod output;

pub use self::hermite4::from_initial_conditions;
pub use self::hermite4::normal_time_step;
pub use self::hermite4::normalize_time_step;
pub use self::hermite4::quantize_down;
pub use self::hermite4::Hermite4;
pub use self::hermite4::Options;
pub use self::output::JsonSnapshotWriter;
pub use self::output::NullSink;
pub use self::output::OutputSink;
pub use self::output::StdoutLog;
