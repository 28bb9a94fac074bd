use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use time::{format_description, OffsetDateTime};

use crate::particles::Particle;

pub(crate) fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(
            &format_description::parse("[year].[month].[day] [hour]:[minute]:[second]").unwrap(),
        )
        .unwrap()
}

/// Output surface of the integrator. The core pushes diagnostics through
/// these callbacks and never formats or persists anything on its own.
pub trait OutputSink {
    fn energy_log(
        &mut self,
        _time: f64,
        _iterations: u64,
        _interactions: u64,
        _nsteps: u64,
        _energy: f64,
    ) {
    }

    fn snapshot(&mut self, _time: f64, _particles: &[Particle]) {}

    fn lagrange_radii(&mut self, _time: f64, _radii: &[f64]) {}

    fn info(&mut self, _message: &str) {}

    fn warning(&mut self, _message: &str) {}
}

/// Sink that drops everything; handy for driving the integrator from tests.
pub struct NullSink;

impl OutputSink for NullSink {}

/// Stdout logger. Tracks the first logged energy so every later line can
/// report the relative drift.
pub struct StdoutLog {
    initial_energy: Option<f64>,
}

impl StdoutLog {
    pub fn new() -> Self {
        Self { initial_energy: None }
    }
}

impl Default for StdoutLog {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StdoutLog {
    fn energy_log(
        &mut self,
        time: f64,
        iterations: u64,
        interactions: u64,
        nsteps: u64,
        energy: f64,
    ) {
        let initial = *self.initial_energy.get_or_insert(energy);
        let drift = if initial != 0. { (energy - initial) / initial } else { 0. };
        println!(
            "{:15.7e} {:10} {:14} {:12} {:+.15e} {:+.3e}",
            time, iterations, interactions, nsteps, energy, drift
        );
    }

    fn lagrange_radii(&mut self, time: f64, radii: &[f64]) {
        let formatted: Vec<String> = radii.iter().map(|r| format!("{r:.6e}")).collect();
        println!("{:15.7e} L {}", time, formatted.join(" "));
    }

    fn info(&mut self, message: &str) {
        println!("[INFO {} UTC] {}", timestamp(), message);
    }

    fn warning(&mut self, message: &str) {
        println!("[WARNING {} UTC] {}", timestamp(), message);
    }
}

#[derive(Serialize)]
struct SnapshotRecord<'a> {
    time: f64,
    particles: &'a [Particle],
}

/// Historic snapshot writer: one JSON document per synchronization, one
/// line each, appended to the given file.
pub struct JsonSnapshotWriter {
    writer: BufWriter<File>,
}

impl JsonSnapshotWriter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }
}

impl OutputSink for JsonSnapshotWriter {
    fn snapshot(&mut self, time: f64, particles: &[Particle]) {
        let record = SnapshotRecord { time, particles };
        if let Ok(line) = serde_json::to_string(&record) {
            let _ = writeln!(self.writer, "{line}");
        }
    }
}
