#![forbid(unsafe_code)]
//! Distribution inputs and outputs.
//!
//! Parses the three plain-text distribution files (file size, file age,
//! directory depth) that configure an aging run, normalizes their weights
//! into ideal fractions, and writes the ideal/actual fraction tables the
//! tool dumps on exit. The chi-squared machinery used by the accuracy
//! probe lives in [`stats`].
//!
//! ## File formats
//!
//! Each input starts with a line holding the entry count `N`, followed by
//! `N` whitespace-separated entry lines:
//!
//! - size:  `<byte_size> <weight>` (a trailing cumulative column is
//!   tolerated and ignored; the parser maintains its own running total)
//! - age:   `<cumulative_fraction> <weight>`
//! - depth: `<depth> <weight> <sibling_fanout>`

use agefs_error::{AgeError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

pub mod stats;

pub use stats::{chi_squared_cdf, AccuracyProbe};

// ── Line-oriented parsing helpers ───────────────────────────────────────────

struct LineParser<R> {
    reader: R,
    origin: String,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> LineParser<R> {
    fn new(reader: R, origin: &str) -> Self {
        Self {
            reader,
            origin: origin.to_owned(),
            line_no: 0,
            buf: String::new(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> AgeError {
        AgeError::Distribution {
            path: self.origin.clone(),
            reason: format!("line {}: {}", self.line_no, reason.into()),
        }
    }

    /// Next non-empty line, split on whitespace.
    fn fields(&mut self) -> Result<Vec<String>> {
        loop {
            self.buf.clear();
            self.line_no += 1;
            let n = self.reader.read_line(&mut self.buf)?;
            if n == 0 {
                return Err(self.error("unexpected end of file"));
            }
            let fields: Vec<String> = self.buf.split_whitespace().map(str::to_owned).collect();
            if !fields.is_empty() {
                return Ok(fields);
            }
        }
    }

    fn entry_count(&mut self) -> Result<usize> {
        let fields = self.fields()?;
        let count: usize = fields[0]
            .parse()
            .map_err(|_| self.error(format!("bad entry count {:?}", fields[0])))?;
        if count == 0 {
            return Err(self.error("distribution must have at least one entry"));
        }
        Ok(count)
    }

    fn parse_field<T: std::str::FromStr>(&self, raw: &str, what: &str) -> Result<T> {
        raw.parse()
            .map_err(|_| self.error(format!("bad {what} {raw:?}")))
    }
}

fn open_reader(path: &Path) -> Result<(BufReader<File>, String)> {
    let origin = path.display().to_string();
    let file = File::open(path).map_err(|err| AgeError::Distribution {
        path: origin.clone(),
        reason: err.to_string(),
    })?;
    Ok((BufReader::new(file), origin))
}

// ── Size distribution ───────────────────────────────────────────────────────

/// One file-size class: a specific byte size, not a range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeClass {
    pub bytes: u64,
    pub weight: f64,
}

/// Target distribution over file-size classes.
#[derive(Debug, Clone)]
pub struct SizeDistribution {
    classes: Vec<SizeClass>,
    cumulative: Vec<f64>,
    total_weight: f64,
}

impl SizeDistribution {
    pub fn load(path: &Path) -> Result<Self> {
        let (reader, origin) = open_reader(path)?;
        Self::from_reader(reader, &origin)
    }

    pub fn from_reader(reader: impl BufRead, origin: &str) -> Result<Self> {
        let mut parser = LineParser::new(reader, origin);
        let count = parser.entry_count()?;
        let mut classes = Vec::with_capacity(count);
        let mut cumulative = Vec::with_capacity(count);
        let mut running = 0.0_f64;
        for _ in 0..count {
            let fields = parser.fields()?;
            if fields.len() < 2 {
                return Err(parser.error("expected <byte_size> <weight>"));
            }
            let bytes: u64 = parser.parse_field(&fields[0], "byte size")?;
            let weight: f64 = parser.parse_field(&fields[1], "weight")?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(parser.error(format!("weight {weight} must be finite and >= 0")));
            }
            running += weight;
            classes.push(SizeClass { bytes, weight });
            cumulative.push(running);
        }
        if running <= 0.0 {
            return Err(parser.error("total weight must be positive"));
        }
        Ok(Self {
            classes,
            cumulative,
            total_weight: running,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    #[must_use]
    pub fn classes(&self) -> &[SizeClass] {
        &self.classes
    }

    #[must_use]
    pub fn class(&self, index: usize) -> SizeClass {
        self.classes[index]
    }

    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Weight of class `index` as a fraction of the total.
    #[must_use]
    pub fn ideal_fraction(&self, index: usize) -> f64 {
        self.classes[index].weight / self.total_weight
    }

    /// Map a uniform draw in `[0, total_weight)` through the cumulative
    /// distribution to a class index.
    #[must_use]
    pub fn class_for_draw(&self, draw: f64) -> usize {
        self.cumulative
            .iter()
            .position(|&edge| draw < edge)
            .unwrap_or(self.classes.len() - 1)
    }
}

// ── Age distribution ────────────────────────────────────────────────────────

/// One age class. `cumulative` is the running fraction of the oldest ages
/// this and all older classes cover, as given in the input file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeClass {
    pub cumulative: f64,
    pub weight: f64,
}

/// Target distribution over file-age classes, youngest first.
#[derive(Debug, Clone)]
pub struct AgeDistribution {
    classes: Vec<AgeClass>,
    total_weight: f64,
}

impl AgeDistribution {
    pub fn load(path: &Path) -> Result<Self> {
        let (reader, origin) = open_reader(path)?;
        Self::from_reader(reader, &origin)
    }

    pub fn from_reader(reader: impl BufRead, origin: &str) -> Result<Self> {
        let mut parser = LineParser::new(reader, origin);
        let count = parser.entry_count()?;
        let mut classes: Vec<AgeClass> = Vec::with_capacity(count);
        let mut total = 0.0_f64;
        for _ in 0..count {
            let fields = parser.fields()?;
            if fields.len() < 2 {
                return Err(parser.error("expected <cumulative_fraction> <weight>"));
            }
            let cumulative: f64 = parser.parse_field(&fields[0], "cumulative fraction")?;
            let weight: f64 = parser.parse_field(&fields[1], "weight")?;
            if !cumulative.is_finite() || cumulative <= 0.0 {
                return Err(parser.error(format!(
                    "cumulative fraction {cumulative} must be finite and > 0"
                )));
            }
            if let Some(prev) = classes.last() {
                // Strictly increasing cumulative fractions keep every
                // bucket's tick span non-empty, which the convergence
                // horizon divides by.
                if cumulative <= prev.cumulative {
                    return Err(
                        parser.error("cumulative fractions must be strictly increasing")
                    );
                }
            }
            if !weight.is_finite() || weight < 0.0 {
                return Err(parser.error(format!("weight {weight} must be finite and >= 0")));
            }
            total += weight;
            classes.push(AgeClass { cumulative, weight });
        }
        if total <= 0.0 {
            return Err(parser.error("total weight must be positive"));
        }
        Ok(Self {
            classes,
            total_weight: total,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    #[must_use]
    pub fn class(&self, index: usize) -> AgeClass {
        self.classes[index]
    }

    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    #[must_use]
    pub fn ideal_fraction(&self, index: usize) -> f64 {
        self.classes[index].weight / self.total_weight
    }

    /// The share of the clock that lies beyond this bucket's young edge:
    /// `1 − cumulative / last_cumulative`. Multiplying by the current
    /// clock yields the bucket's tick cutoff.
    #[must_use]
    pub fn ratio(&self, index: usize) -> f64 {
        let last = self.classes[self.classes.len() - 1].cumulative;
        1.0 - self.classes[index].cumulative / last
    }
}

// ── Directory-depth distribution ────────────────────────────────────────────

/// One directory level: a tree depth, its weight, and how many sibling
/// directories fan out at that level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirLevel {
    pub depth: u32,
    pub weight: f64,
    pub fanout: u32,
}

/// Target distribution over directory depths.
#[derive(Debug, Clone)]
pub struct DirDistribution {
    levels: Vec<DirLevel>,
    total_weight: f64,
}

impl DirDistribution {
    pub fn load(path: &Path) -> Result<Self> {
        let (reader, origin) = open_reader(path)?;
        Self::from_reader(reader, &origin)
    }

    pub fn from_reader(reader: impl BufRead, origin: &str) -> Result<Self> {
        let mut parser = LineParser::new(reader, origin);
        let count = parser.entry_count()?;
        let mut levels = Vec::with_capacity(count);
        let mut total = 0.0_f64;
        for _ in 0..count {
            let fields = parser.fields()?;
            if fields.len() < 3 {
                return Err(parser.error("expected <depth> <weight> <sibling_fanout>"));
            }
            let depth: u32 = parser.parse_field(&fields[0], "depth")?;
            let weight: f64 = parser.parse_field(&fields[1], "weight")?;
            let fanout: u32 = parser.parse_field(&fields[2], "sibling fanout")?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(parser.error(format!("weight {weight} must be finite and >= 0")));
            }
            total += weight;
            levels.push(DirLevel {
                depth,
                weight,
                fanout,
            });
        }
        if total <= 0.0 {
            return Err(parser.error("total weight must be positive"));
        }
        Ok(Self {
            levels,
            total_weight: total,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[must_use]
    pub fn levels(&self) -> &[DirLevel] {
        &self.levels
    }

    #[must_use]
    pub fn level(&self, index: usize) -> DirLevel {
        self.levels[index]
    }

    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    #[must_use]
    pub fn ideal_fraction(&self, index: usize) -> f64 {
        self.levels[index].weight / self.total_weight
    }
}

// ── Output tables ───────────────────────────────────────────────────────────

/// Header label of a fraction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLabel {
    Bucket,
    Size,
    Depth,
}

impl TableLabel {
    #[must_use]
    fn header(self) -> &'static str {
        match self {
            Self::Bucket => "BUCKET",
            Self::Size => "SIZE",
            Self::Depth => "DEPTH",
        }
    }
}

/// One table row: a bucket identifier with its ideal and actual fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractionRow {
    pub id: u64,
    pub ideal: f64,
    pub actual: f64,
}

/// Write an ideal/actual fraction table.
///
/// The format is one header line (`BUCKET FRACTION TYPE` and friends),
/// then for each row a `... IDEAL` and a `... ACTUAL` line with the
/// fraction printed to six decimal places.
pub fn write_fraction_table(path: &Path, label: TableLabel, rows: &[FractionRow]) -> Result<()> {
    let mut out = std::io::BufWriter::new(File::create(path)?);
    writeln!(out, "{} FRACTION TYPE", label.header())?;
    for row in rows {
        writeln!(out, "{} {:.6} IDEAL", row.id, row.ideal)?;
        writeln!(out, "{} {:.6} ACTUAL", row.id, row.actual)?;
    }
    out.flush()?;
    Ok(())
}
