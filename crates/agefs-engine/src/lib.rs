#![forbid(unsafe_code)]
//! The distribution-maintaining aging engine.
//!
//! Drives an underlying filesystem into an aged state by issuing a
//! stream of create and delete operations whose resulting live-file
//! population matches three target distributions at once: file size,
//! file age (in ticks of the logical clock), and directory depth.
//!
//! ## Design
//!
//! The engine is layered:
//!
//! 1. **Arena** — generational slots owning every live-file record; all
//!    links between structures are (index, generation) references.
//! 2. **Buckets** — the three families indexing the live set, with the
//!    age family nesting per-(size, depth) victim rings.
//! 3. **Views** — three ordered maps keyed by each bucket's gap between
//!    ideal and actual fraction; creates and deletes walk these to pick
//!    the bucket that most needs correcting.
//! 4. **Engine** — the tick loop: a rapid-fill phase up to the target
//!    utilization, then stable aging with coin-flipped creates/deletes,
//!    re-aging after every operation, until a halt trigger fires.
//!
//! Exactly one control flow mutates the state; the worker pool runs
//! backend syscalls in parallel but never touches the bookkeeping, which
//! is the source of truth.

use agefs_backend::{issue_create, issue_delete, mkdir_path, BackendDriver, IoPool};
use agefs_dist::{
    write_fraction_table, AccuracyProbe, AgeDistribution, DirDistribution, FractionRow,
    SizeDistribution, TableLabel,
};
use agefs_error::{AgeError, Result};
use agefs_types::{AgingTrigger, GapKey, Tick};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

mod arena;
mod buckets;
mod list;
mod report;
mod rng;

pub use arena::{FileArena, FileRecord, FileRef};
pub use report::RunReport;

use buckets::{fraction, AgeBucket, DirBucket, SizeBucket};
use list::FileList;
use rng::DeterministicRng;

/// How often (in ticks) stable aging refreshes wall time, dumps
/// diagnostics, and runs the accuracy probe.
const DIAG_INTERVAL: u64 = 10_000;

// ── Configuration ───────────────────────────────────────────────────────────

/// Static parameters of an aging run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Backing disk capacity in bytes.
    pub disk_capacity: u64,
    /// Fraction of the capacity rapid fill populates, in [0, 1].
    pub utilization: f64,
    /// Seed for all engine-level randomness.
    pub seed: u64,
    /// Filesystem to age.
    pub mount_point: PathBuf,
    /// Width of the backend I/O pool.
    pub workers: usize,
    /// Workload volume target, in whole disk overwrites.
    pub runs: u64,
    /// Skip backend I/O entirely; bookkeeping still runs.
    pub fake: bool,
    /// Inject idle time between operations (accepted, not acted on).
    pub idle: bool,
    /// Chi-squared confidence target in [0, 1]; zero disables the probe.
    pub confidence: f64,
    /// Wall-clock cap in minutes.
    pub runtime_max_mins: f64,
    /// Output table paths.
    pub age_out: PathBuf,
    pub size_out: PathBuf,
    pub dir_out: PathBuf,
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.disk_capacity == 0 {
            return Err(AgeError::Config("disk capacity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.utilization) {
            return Err(AgeError::Config(format!(
                "utilization {} must be within [0, 1]",
                self.utilization
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AgeError::Config(format!(
                "confidence {} must be within [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Point-in-time description of a live file, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFileInfo {
    pub path: String,
    pub size: u64,
    pub birth: u64,
    pub depth: u32,
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// The aging engine. Owns all bookkeeping plus the backend I/O pool.
pub struct AgingEngine {
    config: EngineConfig,
    sizes: SizeDistribution,
    backend: Arc<dyn BackendDriver>,
    pool: IoPool,
    rng: DeterministicRng,

    arena: FileArena,
    all_files: FileList,
    size_buckets: Vec<SizeBucket>,
    dir_buckets: Vec<DirBucket>,
    age_buckets: Vec<AgeBucket>,
    size_view: BTreeMap<GapKey, usize>,
    dir_view: BTreeMap<GapKey, usize>,
    age_view: BTreeMap<GapKey, usize>,

    tick: u64,
    live_files: u64,
    live_bytes: u64,
    workload_bytes: u64,
    /// Tick count at the end of rapid fill.
    fill_ticks: u64,
    /// Convergence horizon stable aging re-ages against.
    horizon: u64,

    /// Adjustable copies of the run-length knobs; the resume prompt can
    /// raise them between stable-aging rounds.
    runs: u64,
    runtime_max_mins: f64,
    confidence: f64,
    probe: Option<AccuracyProbe>,

    started: Instant,
    runtime_mins: f64,
    stop: Arc<AtomicBool>,
}

impl AgingEngine {
    /// Build the engine: validates the configuration, lays out the three
    /// bucket families with their ideal fractions, and creates the
    /// directory tree through the backend (unless faking).
    pub fn new(
        config: EngineConfig,
        sizes: SizeDistribution,
        ages: AgeDistribution,
        dirs: DirDistribution,
        backend: Arc<dyn BackendDriver>,
    ) -> Result<Self> {
        config.validate()?;
        if config.idle {
            debug!("idle-time injection is accepted but not implemented");
        }

        let mut size_buckets = Vec::with_capacity(sizes.len());
        for (index, class) in sizes.classes().iter().enumerate() {
            if sizes.classes()[..index].iter().any(|c| c.bytes == class.bytes) {
                return Err(AgeError::Config(format!(
                    "duplicate size class {} bytes",
                    class.bytes
                )));
            }
            size_buckets.push(SizeBucket::new(class.bytes, sizes.ideal_fraction(index)));
        }

        let mut dir_buckets = Vec::with_capacity(dirs.len());
        let mut deepest = 0u32;
        for (index, level) in dirs.levels().iter().enumerate() {
            if dirs.levels()[..index].iter().any(|l| l.depth == level.depth) {
                return Err(AgeError::Config(format!(
                    "duplicate directory depth {}",
                    level.depth
                )));
            }
            let prefix = depth_prefix(level.depth, level.fanout);
            if level.depth > 0 && deepest < level.depth && !config.fake {
                create_depth_dirs(&*backend, &config.mount_point, level, &prefix)?;
            }
            if level.depth > 0 {
                deepest = deepest.max(level.depth);
            }
            dir_buckets.push(DirBucket::new(
                level.depth,
                level.fanout,
                dirs.ideal_fraction(index),
                prefix,
            ));
        }

        let mut age_buckets = Vec::with_capacity(ages.len());
        for index in 0..ages.len() {
            age_buckets.push(AgeBucket::new(
                index,
                ages.ideal_fraction(index),
                ages.ratio(index),
            ));
        }

        let probe = AccuracyProbe::new(ages.len(), config.confidence);
        if config.confidence > 0.0 {
            if probe.is_none() {
                return Err(AgeError::Config(
                    "the accuracy probe needs at least two age classes".into(),
                ));
            }
            if age_buckets.iter().any(|b| b.ideal <= 0.0) {
                return Err(AgeError::Config(
                    "the accuracy probe needs every age class weight to be positive".into(),
                ));
            }
        }

        let mut engine = Self {
            rng: DeterministicRng::new(config.seed),
            pool: IoPool::new(config.workers),
            runs: config.runs,
            runtime_max_mins: config.runtime_max_mins,
            confidence: config.confidence,
            probe,
            config,
            sizes,
            backend,
            arena: FileArena::new(),
            all_files: FileList::new(),
            size_buckets,
            dir_buckets,
            age_buckets,
            size_view: BTreeMap::new(),
            dir_view: BTreeMap::new(),
            age_view: BTreeMap::new(),
            tick: 0,
            live_files: 0,
            live_bytes: 0,
            workload_bytes: 0,
            fill_ticks: 0,
            horizon: 0,
            started: Instant::now(),
            runtime_mins: 0.0,
            stop: Arc::new(AtomicBool::new(false)),
        };
        engine.rebuild_size_view();
        engine.rebuild_dir_view();
        for index in 0..engine.age_buckets.len() {
            engine.re_key_age(index);
        }
        Ok(engine)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    #[must_use]
    pub fn tick(&self) -> Tick {
        Tick(self.tick)
    }

    #[must_use]
    pub fn live_files(&self) -> u64 {
        self.live_files
    }

    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    #[must_use]
    pub fn workload_bytes(&self) -> u64 {
        self.workload_bytes
    }

    /// Tick count at the end of rapid fill (zero before that phase ran).
    #[must_use]
    pub fn fill_ticks(&self) -> u64 {
        self.fill_ticks
    }

    /// Wall-clock minutes elapsed in the current stable-aging round.
    #[must_use]
    pub fn runtime_mins(&self) -> f64 {
        self.started.elapsed().as_secs_f64() / 60.0
    }

    /// Disk overwrites produced so far, as a fraction of capacity.
    #[must_use]
    pub fn overwrites_achieved(&self) -> f64 {
        self.workload_bytes as f64 / self.config.disk_capacity as f64
    }

    /// Shared flag that makes the engine stop at the next operation
    /// boundary. Intended for a SIGINT handler.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// CDF value of the current age chi-squared statistic, when the
    /// probe is enabled.
    #[must_use]
    pub fn current_goodness(&self) -> Option<f64> {
        self.probe.map(|probe| probe.goodness(self.chi_squared()))
    }

    /// Current confidence target; zero when the probe is disabled.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Replace the probe's confidence target (resume prompt).
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence;
        self.probe = AccuracyProbe::new(self.age_buckets.len(), confidence);
    }

    /// Restart the wall clock with a new cap (resume prompt).
    pub fn extend_runtime(&mut self, max_mins: f64) {
        self.runtime_max_mins = max_mins;
        self.runtime_mins = 0.0;
        self.started = Instant::now();
    }

    /// Raise the overwrite target (resume prompt).
    pub fn add_runs(&mut self, more: u64) {
        self.runs += more;
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    // ── Phases ──────────────────────────────────────────────────────────

    /// Populate the disk to `capacity × utilization`, sampling each
    /// create's size class from the configured distribution. Age and
    /// depth targets are ignored during this phase.
    pub fn run_rapid_fill(&mut self) -> Result<()> {
        let target = (self.config.disk_capacity as f64 * self.config.utilization) as u64;
        info!(target_bytes = target, "rapid fill started");
        while self.live_bytes < target && !self.stop_requested() {
            let draw = self.rng.next_f64() * self.sizes.total_weight();
            let class = self.sizes.class_for_draw(draw);
            self.perform_op(true, Some(class))?;
        }
        self.fill_ticks = self.tick;
        info!(
            ticks = self.fill_ticks,
            live_files = self.live_files,
            live_bytes = self.live_bytes,
            "rapid fill complete"
        );
        Ok(())
    }

    /// Maintain all three distributions with gap-guided creates and
    /// deletes until a halt trigger fires.
    pub fn run_stable_aging(&mut self) -> Result<AgingTrigger> {
        self.horizon = self.convergence_horizon();
        self.re_age(self.horizon);
        let till = self.config.disk_capacity.saturating_mul(self.runs);
        info!(
            horizon = self.horizon,
            workload_target = till,
            "stable aging started"
        );
        loop {
            if self.stop_requested() {
                return Ok(AgingTrigger::Interrupted);
            }
            let create = self.toss_coin() < 0.5;
            self.perform_op(create, None)?;
            self.re_age(self.horizon);

            if self.tick % DIAG_INTERVAL == 0 {
                self.runtime_mins = self.started.elapsed().as_secs_f64() / 60.0;
                info!(
                    workload_mb = self.workload_bytes / (1024 * 1024),
                    runtime_mins = self.runtime_mins,
                    convergence_ops = self.horizon,
                    operations = self.tick,
                    "aging progress"
                );
                self.log_age_buckets();
                self.write_age_table()?;
                if let Some(probe) = self.probe {
                    if probe.is_met(self.chi_squared()) {
                        self.write_distribution_tables()?;
                        return Ok(AgingTrigger::Accuracy);
                    }
                }
            }

            if self.tick >= self.horizon {
                return Ok(AgingTrigger::Convergence);
            } else if self.workload_bytes >= till {
                return Ok(AgingTrigger::Workload);
            } else if self.runtime_mins >= self.runtime_max_mins {
                return Ok(AgingTrigger::ExecTime);
            }
        }
    }

    /// The minimum tick count at which the configured age distribution
    /// is attainable, given the rapid-fill tick count.
    #[must_use]
    pub fn convergence_horizon(&self) -> u64 {
        let n = self.age_buckets.len();
        let k = self.fill_ticks as f64;
        if n == 1 {
            // One bucket holds everything; the fill itself converged.
            return self.fill_ticks;
        }
        let mut best: i64 = 0;
        for i in 0..n - 1 {
            let span = if i == 0 {
                1.0 - self.age_buckets[0].ratio
            } else {
                self.age_buckets[i - 1].ratio - self.age_buckets[i].ratio
            };
            let t = (2.0 * k * (self.age_buckets[i].ideal / span)) as i64;
            if t > best {
                best = t;
            }
        }
        let last_span = self.age_buckets[n - 2].ratio - self.age_buckets[n - 1].ratio;
        let t = ((2.0 * k * (self.age_buckets[n - 1].ideal - 1.0) + k) / last_span) as i64;
        if t > 0 && t > best {
            best = t;
        }
        let mut horizon = u64::try_from(best).unwrap_or(0);
        if last_span * horizon as f64 <= k {
            horizon = (k / last_span) as u64;
        }
        horizon
    }

    /// Refresh every age cutoff against `clock` and migrate files whose
    /// birth has fallen behind their bucket's cutoff into the next older
    /// bucket. The oldest bucket is a sink.
    pub fn re_age(&mut self, clock: u64) {
        let n = self.age_buckets.len();
        for bucket in &mut self.age_buckets {
            bucket.cutoff = (bucket.ratio * clock as f64) as u64;
        }
        let live = self.live_files;
        for i in 0..n.saturating_sub(1) {
            if self.age_buckets[i].youngest.is_none() {
                continue;
            }
            while self.age_buckets[i].count > 0 {
                let front = self.age_buckets[i]
                    .oldest
                    .expect("non-empty bucket has a window");
                if self.arena.get(front).birth.0 >= self.age_buckets[i].cutoff {
                    break;
                }
                let (left, right) = self.age_buckets.split_at_mut(i + 1);
                left[i].delete_file(&mut self.arena, front, live);
                right[0].add_file(&mut self.arena, front, live, false);
            }
        }
        for index in 0..n {
            self.re_key_age(index);
        }
    }

    /// Age chi-squared statistic: `Σ (ideal − actual)² / ideal`.
    #[must_use]
    pub fn chi_squared(&self) -> f64 {
        self.age_buckets
            .iter()
            .map(|bucket| {
                let gap = bucket.ideal - bucket.actual;
                gap * gap / bucket.ideal
            })
            .sum()
    }

    // ── One operation ───────────────────────────────────────────────────

    /// Advance the clock and perform one create or delete. A create that
    /// cannot fit any size class in the remaining capacity is converted
    /// into a delete on the same tick.
    fn perform_op(&mut self, create: bool, forced_class: Option<usize>) -> Result<()> {
        self.tick += 1;
        let mut need_delete = !create;
        if create {
            match self.create_file(forced_class) {
                Ok(added) => {
                    self.live_bytes += added;
                    self.workload_bytes += added;
                }
                Err(AgeError::CapacityExhausted) => {
                    need_delete = true;
                }
                Err(err) => return Err(err),
            }
        }
        if need_delete {
            let freed = self.delete_file()?;
            self.live_bytes -= freed;
        }
        Ok(())
    }

    fn toss_coin(&mut self) -> f64 {
        self.rng.next_usize(100) as f64 / 100.0
    }

    /// Create one file: forced size class during rapid fill, otherwise
    /// the class whose actual fraction sits farthest below ideal that
    /// still fits the remaining capacity. Depth comes from the head of
    /// the directory ordering.
    pub(crate) fn create_file(&mut self, forced_class: Option<usize>) -> Result<u64> {
        let size_index = match forced_class {
            Some(index) => index,
            None => {
                let mut chosen = None;
                for (_, &index) in self.size_view.iter().rev() {
                    if self.size_buckets[index].bytes + self.live_bytes < self.config.disk_capacity
                    {
                        chosen = Some(index);
                        break;
                    }
                }
                match chosen {
                    Some(index) => index,
                    None => {
                        info!("cannot create a single file, exhausted all options");
                        return Err(AgeError::CapacityExhausted);
                    }
                }
            }
        };

        let dir_index = *self
            .dir_view
            .values()
            .next()
            .expect("directory view is never empty");
        let (depth, fanout, prefix) = {
            let bucket = &self.dir_buckets[dir_index];
            (bucket.depth, bucket.fanout, bucket.prefix.clone())
        };
        let sibling = if depth > 0 && fanout > 0 {
            Some(1 + u32::try_from(self.rng.next_usize(fanout as usize)).expect("fanout fits u32"))
        } else {
            None
        };
        let rel = relative_path(&prefix, sibling, self.tick);
        let bytes = self.size_buckets[size_index].bytes;
        let record = FileRecord::new(rel.clone(), bytes, Tick(self.tick), depth);
        let prealloc = record.geometry.preallocation_bytes();
        let file = self.arena.insert(record);

        if !self.config.fake {
            let driver = Arc::clone(&self.backend);
            let full = join_rel(&self.config.mount_point, &rel);
            self.pool
                .enqueue(move || issue_create(&*driver, &full, prealloc));
        }

        self.live_files += 1;
        self.dir_buckets[dir_index].count += 1;
        self.rebuild_dir_view();

        self.all_files.push_back(&mut self.arena, file);

        let live = self.live_files;
        self.size_buckets[size_index].add_file(&mut self.arena, file, live);
        self.rebuild_size_view();

        self.age_buckets[0].add_file(&mut self.arena, file, live, false);
        self.re_key_age(0);

        Ok(bytes)
    }

    /// Delete one file, chosen by walking the age view from its
    /// over-represented end, the size view from its over-represented
    /// start, and the directory view from its over-represented end,
    /// taking the first group that holds a file.
    pub(crate) fn delete_file(&mut self) -> Result<u64> {
        let mut found = None;
        'search: for (_, &age_index) in self.age_view.iter().rev() {
            for (_, &size_index) in self.size_view.iter() {
                let bytes = self.size_buckets[size_index].bytes;
                for (_, &dir_index) in self.dir_view.iter().rev() {
                    let depth = self.dir_buckets[dir_index].depth;
                    if let Some(file) =
                        self.age_buckets[age_index].file_to_delete(&self.arena, bytes, depth)
                    {
                        found = Some((file, age_index, size_index, dir_index));
                        break 'search;
                    }
                }
            }
        }
        let Some((file, age_index, size_index, dir_index)) = found else {
            return Err(AgeError::NoVictim);
        };
        let (rel, bytes) = {
            let record = self.arena.get(file);
            (record.path.clone(), record.size)
        };

        if !self.config.fake {
            let driver = Arc::clone(&self.backend);
            let full = join_rel(&self.config.mount_point, &rel);
            self.pool.enqueue(move || issue_delete(&*driver, &full));
        }

        self.live_files -= 1;
        let live = self.live_files;
        self.dir_buckets[dir_index].count -= 1;
        self.rebuild_dir_view();

        self.age_buckets[age_index].delete_file(&mut self.arena, file, live);
        self.re_key_age(age_index);

        self.size_buckets[size_index].delete_file(&mut self.arena, file, live);
        self.rebuild_size_view();

        self.all_files.remove(&mut self.arena, file);
        self.arena.remove(file);
        Ok(bytes)
    }

    // ── Views ───────────────────────────────────────────────────────────

    fn rebuild_size_view(&mut self) {
        self.size_view.clear();
        let live = self.live_files;
        for (index, bucket) in self.size_buckets.iter_mut().enumerate() {
            bucket.re_key(live);
            let previous = self.size_view.insert(bucket.key, index);
            assert!(previous.is_none(), "size view keys collide");
        }
    }

    fn rebuild_dir_view(&mut self) {
        self.dir_view.clear();
        let live = self.live_files;
        for (index, bucket) in self.dir_buckets.iter_mut().enumerate() {
            bucket.re_key(live);
            let previous = self.dir_view.insert(bucket.key, index);
            assert!(previous.is_none(), "directory view keys collide");
        }
    }

    /// Re-key a single age bucket from its stored fractions. Unlike the
    /// size and directory families, untouched age buckets keep their
    /// previous actual fraction until an operation lands on them.
    fn re_key_age(&mut self, index: usize) {
        let bucket = &mut self.age_buckets[index];
        self.age_view.remove(&bucket.key);
        bucket.key = bucket.gap_key();
        let previous = self.age_view.insert(bucket.key, index);
        assert!(previous.is_none(), "age view keys collide");
    }

    // ── Dumps and diagnostics ───────────────────────────────────────────

    /// Write all three ideal/actual tables.
    pub fn write_distribution_tables(&self) -> Result<()> {
        self.write_age_table()?;
        self.write_size_table()?;
        self.write_dir_table()
    }

    fn write_age_table(&self) -> Result<()> {
        let rows: Vec<FractionRow> = self
            .age_buckets
            .iter()
            .map(|bucket| FractionRow {
                id: bucket.id as u64,
                ideal: bucket.ideal,
                actual: bucket.actual,
            })
            .collect();
        write_fraction_table(&self.config.age_out, TableLabel::Bucket, &rows)
    }

    fn write_size_table(&self) -> Result<()> {
        let rows: Vec<FractionRow> = self
            .size_buckets
            .iter()
            .map(|bucket| FractionRow {
                id: bucket.bytes,
                ideal: bucket.ideal,
                actual: bucket.actual,
            })
            .collect();
        write_fraction_table(&self.config.size_out, TableLabel::Size, &rows)
    }

    fn write_dir_table(&self) -> Result<()> {
        let rows: Vec<FractionRow> = self
            .dir_buckets
            .iter()
            .map(|bucket| FractionRow {
                id: u64::from(bucket.depth),
                ideal: bucket.ideal,
                actual: bucket.actual,
            })
            .collect();
        write_fraction_table(&self.config.dir_out, TableLabel::Depth, &rows)
    }

    fn log_age_buckets(&self) {
        for bucket in &self.age_buckets {
            let oldest = bucket.oldest.map_or(0, |f| self.arena.get(f).birth.0);
            let youngest = bucket.youngest.map_or(0, |f| self.arena.get(f).birth.0);
            debug!(
                bucket = bucket.id,
                ideal = bucket.ideal,
                actual = bucket.actual,
                count = bucket.count,
                cutoff = bucket.cutoff,
                oldest,
                youngest,
                "age bucket"
            );
        }
    }

    /// End-of-run summary.
    #[must_use]
    pub fn report(&self) -> RunReport {
        RunReport {
            runtime_mins: self.runtime_mins(),
            operations: self.tick,
            disk_overwrites: self.runs,
            workload_mb: self.workload_bytes / (1024 * 1024),
            confidence: (self.confidence > 0.0).then_some(self.confidence),
            size_out: self.config.size_out.display().to_string(),
            dir_out: self.config.dir_out.display().to_string(),
            age_out: self.config.age_out.display().to_string(),
        }
    }

    // ── Introspection (diagnostics and tests) ───────────────────────────

    /// Live files in insertion order.
    #[must_use]
    pub fn live_file_snapshot(&self) -> Vec<LiveFileInfo> {
        self.all_files
            .collect(&self.arena)
            .into_iter()
            .map(|file| {
                let record = self.arena.get(file);
                LiveFileInfo {
                    path: record.path.clone(),
                    size: record.size,
                    birth: record.birth.0,
                    depth: record.depth,
                }
            })
            .collect()
    }

    /// Per-age-bucket live counts, youngest bucket first.
    #[must_use]
    pub fn age_bucket_counts(&self) -> Vec<u64> {
        self.age_buckets.iter().map(|b| b.count).collect()
    }

    /// Birth ticks of one age bucket's members, oldest first.
    #[must_use]
    pub fn age_bucket_births(&self, index: usize) -> Vec<u64> {
        let bucket = &self.age_buckets[index];
        let mut births = Vec::new();
        let mut cursor = bucket.oldest;
        for _ in 0..bucket.count {
            let file = cursor.expect("age window shorter than its count");
            births.push(self.arena.get(file).birth.0);
            cursor = self.arena.get(file).list_next;
        }
        births
    }

    /// Per-size-class live counts, in input order.
    #[must_use]
    pub fn size_bucket_counts(&self) -> Vec<u64> {
        self.size_buckets.iter().map(|b| b.count).collect()
    }

    /// Per-depth live counts, in input order.
    #[must_use]
    pub fn dir_bucket_counts(&self) -> Vec<u64> {
        self.dir_buckets.iter().map(|b| b.count).collect()
    }

    /// Cross-check every structural invariant of the bookkeeping.
    ///
    /// Panics on the first inconsistency. Intended for tests and
    /// deep-diagnostic runs; it walks every live file.
    pub fn verify_consistency(&self) {
        let live = self.live_files;
        assert_eq!(self.arena.live() as u64, live, "arena live count");
        assert_eq!(self.all_files.count(), live, "global list count");

        let age_total: u64 = self.age_buckets.iter().map(|b| b.count).sum();
        let size_total: u64 = self.size_buckets.iter().map(|b| b.count).sum();
        let dir_total: u64 = self.dir_buckets.iter().map(|b| b.count).sum();
        assert_eq!(age_total, live, "age bucket counts");
        assert_eq!(size_total, live, "size bucket counts");
        assert_eq!(dir_total, live, "dir bucket counts");

        // Fractions of the fully re-keyed families are exact.
        for bucket in &self.size_buckets {
            assert_eq!(bucket.actual, fraction(bucket.count, live));
        }
        for bucket in &self.dir_buckets {
            assert_eq!(bucket.actual, fraction(bucket.count, live));
        }

        // Global list: insertion order is birth order, paths unique.
        let files = self.all_files.collect(&self.arena);
        assert_eq!(self.all_files.head(), files.first().copied());
        let mut last_birth = 0;
        let mut paths = std::collections::HashSet::new();
        for &file in &files {
            let record = self.arena.get(file);
            assert!(record.birth.0 > last_birth, "list must be in birth order");
            last_birth = record.birth.0;
            assert!(paths.insert(record.path.clone()), "duplicate live path");
        }

        // Age windows partition the list contiguously, oldest bucket at
        // the front of the list.
        let mut walked = 0u64;
        let mut position = 0usize;
        for bucket in self.age_buckets.iter().rev() {
            let mut nested: u64 = 0;
            for slot in bucket.sizes.values() {
                let depth_sum: u64 = slot.depths.values().map(|g| g.count).sum();
                assert_eq!(depth_sum, slot.count, "age size slot counts");
                nested += slot.count;
            }
            assert_eq!(nested, bucket.count, "age bucket nested counts");

            if bucket.count == 0 {
                assert!(bucket.oldest.is_none() && bucket.youngest.is_none());
                continue;
            }
            let first = bucket.oldest.expect("window front");
            let last = bucket.youngest.expect("window back");
            assert_eq!(files[position], first, "windows must tile the list");
            position += usize::try_from(bucket.count).expect("count fits usize") - 1;
            assert_eq!(files[position], last, "window back position");
            position += 1;
            walked += bucket.count;
        }
        assert_eq!(walked, live, "windows cover the live set");

        // Size rings close and match their counts.
        for bucket in &self.size_buckets {
            let per_depth: u64 = bucket.depth_counts.values().sum();
            assert_eq!(per_depth, bucket.count, "size bucket depth counts");
            if bucket.count == 0 {
                assert!(bucket.oldest.is_none());
                continue;
            }
            let head = bucket.oldest.expect("ring head");
            let mut cursor = head;
            for _ in 0..bucket.count {
                let record = self.arena.get(cursor);
                assert_eq!(record.size, bucket.bytes);
                cursor = record.size_next.expect("ring link");
            }
            assert_eq!(cursor, head, "size ring must close");
        }

        // The size buckets' per-depth counts tile the depth family: for
        // every depth, the column across all size classes sums to that
        // dir bucket's own count.
        for dir in &self.dir_buckets {
            let column: u64 = self
                .size_buckets
                .iter()
                .map(|bucket| bucket.depth_counts.get(&dir.depth).copied().unwrap_or(0))
                .sum();
            assert_eq!(column, dir.count, "depth {} column count", dir.depth);
        }

        // Views mirror the buckets one-to-one.
        assert_eq!(self.size_view.len(), self.size_buckets.len());
        assert_eq!(self.dir_view.len(), self.dir_buckets.len());
        assert_eq!(self.age_view.len(), self.age_buckets.len());
        for (key, &index) in &self.size_view {
            assert_eq!(*key, self.size_buckets[index].key);
        }
        for (key, &index) in &self.dir_view {
            assert_eq!(*key, self.dir_buckets[index].key);
        }
        for (key, &index) in &self.age_view {
            assert_eq!(*key, self.age_buckets[index].key);
        }
    }
}

// ── Path helpers ────────────────────────────────────────────────────────────

/// Directory prefix for one depth level: `d1/d2/…` down to the level's
/// parent, plus the level's own `dN` when there is no sibling fan-out.
fn depth_prefix(depth: u32, fanout: u32) -> String {
    let mut parts: Vec<String> = (1..depth).map(|i| format!("d{i}")).collect();
    if depth > 0 && fanout == 0 {
        parts.push(format!("d{depth}"));
    }
    parts.join("/")
}

fn join_rel(mount: &Path, rel: &str) -> PathBuf {
    if rel.is_empty() {
        mount.to_path_buf()
    } else {
        mount.join(rel)
    }
}

/// Mount-relative file path: `<prefix>/[dK/]<tick>`.
fn relative_path(prefix: &str, sibling: Option<u32>, tick: u64) -> String {
    let mut rel = String::new();
    if !prefix.is_empty() {
        rel.push_str(prefix);
        rel.push('/');
    }
    if let Some(j) = sibling {
        rel.push_str(&format!("d{j}/"));
    }
    rel.push_str(&tick.to_string());
    rel
}

/// Create the physical directories backing one depth level.
fn create_depth_dirs(
    backend: &dyn BackendDriver,
    mount: &Path,
    level: &agefs_dist::DirLevel,
    prefix: &str,
) -> Result<()> {
    let mut targets = Vec::new();
    if level.fanout == 0 {
        targets.push(join_rel(mount, prefix));
    } else {
        for j in 1..=level.fanout {
            targets.push(join_rel(mount, prefix).join(format!("d{j}")));
        }
    }
    for target in targets {
        debug!(path = %target.display(), "creating directory level");
        mkdir_path(backend, &target, 0o777).map_err(|source| AgeError::Backend {
            op: "mkdir",
            path: target.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
