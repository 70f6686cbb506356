//! End-of-run summary.

use serde::Serialize;
use std::fmt;

/// Overall statistics printed (and optionally serialized) when a run
/// stops.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Wall-clock runtime in minutes.
    pub runtime_mins: f64,
    /// Total create/delete operations issued.
    pub operations: u64,
    /// Requested number of disk overwrites.
    pub disk_overwrites: u64,
    /// Cumulative workload in mebibytes.
    pub workload_mb: u64,
    /// Confidence level when the accuracy probe was enabled.
    pub confidence: Option<f64>,
    /// Where the size distribution table was written.
    pub size_out: String,
    /// Where the directory-depth distribution table was written.
    pub dir_out: String,
    /// Where the age distribution table was written.
    pub age_out: String,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============= OVERALL STATISTICS ===============")?;
        writeln!(f, " Total runtime = {} mins.", self.runtime_mins)?;
        writeln!(f, " Total number of operations = {}", self.operations)?;
        writeln!(f, " Number of disk overwrites = {}", self.disk_overwrites)?;
        writeln!(
            f,
            " Total aging workload created = {} MB",
            self.workload_mb
        )?;
        match self.confidence {
            Some(confidence) => writeln!(
                f,
                " Confidence achieved (chi-squared measure) = {confidence}"
            )?,
            None => writeln!(f, " Perfect convergence achieved")?,
        }
        writeln!(f, " Size distribution dumped in {}", self.size_out)?;
        writeln!(f, " Dir depth distribution dumped in {}", self.dir_out)?;
        writeln!(f, " Age distribution dumped in {}", self.age_out)?;
        write!(f, "================================================")
    }
}
