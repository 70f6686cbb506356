#![forbid(unsafe_code)]
//! Core value types shared across the agefs workspace.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The logical clock.
///
/// Increments once per create or delete operation and doubles as each
/// file's birth stamp, so tick arithmetic is the unit of file age.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Self = Self(0);

    /// The tick following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Preallocation geometry derived from a logical file size.
///
/// Sizes of at least 4096 bytes preallocate in 4096-byte blocks, sizes of
/// at least 1024 bytes in 1024-byte blocks, and smaller files in a single
/// block of their own size. A zero-size file reports one 4096-byte block
/// with a count of zero, so nothing is preallocated for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGeometry {
    /// Block size in bytes.
    pub block_size: u64,
    /// Number of whole blocks covering the file.
    pub block_count: u64,
}

impl BlockGeometry {
    /// Derive the geometry for a logical file size.
    #[must_use]
    pub fn for_size(size: u64) -> Self {
        if size == 0 {
            Self {
                block_size: 4096,
                block_count: 0,
            }
        } else if size >= 4096 {
            Self {
                block_size: 4096,
                block_count: size / 4096,
            }
        } else if size >= 1024 {
            Self {
                block_size: 1024,
                block_count: size / 1024,
            }
        } else {
            Self {
                block_size: size,
                block_count: 1,
            }
        }
    }

    /// Bytes actually preallocated on the backend for this geometry.
    #[must_use]
    pub fn preallocation_bytes(self) -> u64 {
        self.block_size * self.block_count
    }
}

/// Ordering key for the gap-ordered bucket views.
///
/// Views sort ascending by the signed fraction gap, with a per-family
/// numeric tiebreaker (age bucket id, size class in bytes, or directory
/// depth). The gap is finite by construction, so `f64::total_cmp` gives a
/// total order without an epsilon.
#[derive(Debug, Clone, Copy)]
pub struct GapKey {
    /// Signed gap between ideal and actual fraction. The sign convention
    /// differs per bucket family and is preserved in the textual dumps.
    pub diff: f64,
    /// Secondary ordering key, ascending.
    pub tie: u64,
}

impl GapKey {
    #[must_use]
    pub fn new(diff: f64, tie: u64) -> Self {
        Self { diff, tie }
    }
}

impl PartialEq for GapKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GapKey {}

impl PartialOrd for GapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.diff
            .total_cmp(&other.diff)
            .then_with(|| self.tie.cmp(&other.tie))
    }
}

/// Why stable aging stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgingTrigger {
    /// The tick count reached the convergence horizon.
    Convergence,
    /// The cumulative workload reached the requested number of disk
    /// overwrites.
    Workload,
    /// The wall-clock runtime cap elapsed.
    ExecTime,
    /// The chi-squared accuracy probe met the configured confidence.
    Accuracy,
    /// A stop was requested (SIGINT).
    Interrupted,
}

impl fmt::Display for AgingTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Convergence => "perfect convergence in relative age distribution",
            Self::Workload => "reaching intended workload size",
            Self::ExecTime => "reaching runtime limit",
            Self::Accuracy => "meeting intended aging accuracy",
            Self::Interrupted => "stop request",
        };
        f.write_str(label)
    }
}
