//! Engine scenario and property tests.

use super::*;
use agefs_backend::MemoryDriver;
use proptest::prelude::*;
use std::io::Cursor;

fn sizes(text: &str) -> SizeDistribution {
    SizeDistribution::from_reader(Cursor::new(text), "sizes").expect("size distribution")
}

fn ages(text: &str) -> AgeDistribution {
    AgeDistribution::from_reader(Cursor::new(text), "ages").expect("age distribution")
}

fn dirs(text: &str) -> DirDistribution {
    DirDistribution::from_reader(Cursor::new(text), "dirs").expect("dir distribution")
}

struct TestRig {
    engine: AgingEngine,
    driver: Arc<MemoryDriver>,
    _out: tempfile::TempDir,
}

fn rig(
    capacity: u64,
    utilization: f64,
    confidence: f64,
    fake: bool,
    size_text: &str,
    age_text: &str,
    dir_text: &str,
) -> TestRig {
    let out = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig {
        disk_capacity: capacity,
        utilization,
        seed: 42,
        mount_point: PathBuf::from("/mnt"),
        workers: 1,
        runs: 1_000_000,
        fake,
        idle: false,
        confidence,
        runtime_max_mins: 30.0,
        age_out: out.path().join("ages.out"),
        size_out: out.path().join("sizes.out"),
        dir_out: out.path().join("dirs.out"),
    };
    let driver = Arc::new(MemoryDriver::new());
    let engine = AgingEngine::new(
        config,
        sizes(size_text),
        ages(age_text),
        dirs(dir_text),
        Arc::clone(&driver) as Arc<dyn BackendDriver>,
    )
    .expect("engine");
    TestRig {
        engine,
        driver,
        _out: out,
    }
}

fn one_kib_rig(capacity: u64, utilization: f64) -> TestRig {
    rig(
        capacity,
        utilization,
        0.0,
        true,
        "1\n1024 1\n",
        "2\n0.5 1\n1.0 1\n",
        "1\n0 1 0\n",
    )
}

#[test]
fn rapid_fill_reaches_utilization_in_the_youngest_bucket() {
    let mut rig = one_kib_rig(10 * 1024, 1.0);
    rig.engine.run_rapid_fill().expect("rapid fill");

    assert_eq!(rig.engine.live_files(), 10);
    assert_eq!(rig.engine.tick().0, 10);
    assert_eq!(rig.engine.live_bytes(), 10 * 1024);
    assert_eq!(rig.engine.fill_ticks(), 10);
    assert_eq!(rig.engine.age_bucket_counts(), vec![10, 0]);
    rig.engine.verify_consistency();

    // Fake mode keeps the backend untouched.
    assert_eq!(rig.driver.file_count(), 0);
}

#[test]
fn re_age_splits_files_by_birth_tick() {
    let mut rig = one_kib_rig(10 * 1024, 1.0);
    rig.engine.run_rapid_fill().expect("rapid fill");

    // Cutoff ratios are {0.5, 0}; against a future clock of 20 the young
    // bucket keeps only files born at tick 10 or later.
    rig.engine.re_age(20);

    assert_eq!(rig.engine.age_bucket_counts(), vec![1, 9]);
    assert_eq!(rig.engine.age_bucket_births(0), vec![10]);
    assert_eq!(rig.engine.age_bucket_births(1), (1..=9).collect::<Vec<_>>());
    rig.engine.verify_consistency();
}

#[test]
fn re_age_is_idempotent_at_a_fixed_clock() {
    let mut rig = one_kib_rig(10 * 1024, 1.0);
    rig.engine.run_rapid_fill().expect("rapid fill");
    rig.engine.re_age(20);
    let counts = rig.engine.age_bucket_counts();
    rig.engine.re_age(20);
    assert_eq!(rig.engine.age_bucket_counts(), counts);
    rig.engine.verify_consistency();
}

#[test]
fn re_age_placement_respects_cutoff_bounds() {
    let mut rig = rig(
        40 * 1024,
        1.0,
        0.0,
        true,
        "1\n1024 1\n",
        "3\n0.25 1\n0.5 1\n1.0 2\n",
        "1\n0 1 0\n",
    );
    rig.engine.run_rapid_fill().expect("rapid fill");
    let clock = 80;
    rig.engine.re_age(clock);
    rig.engine.verify_consistency();

    // Ratios are {0.75, 0.5, 0}; bucket i keeps births >= ratio_i * clock
    // and (for i > 0) births < ratio_{i-1} * clock.
    let cutoffs = [60, 40, 0];
    for (bucket, &cutoff) in (0..3).zip(&cutoffs) {
        for birth in rig.engine.age_bucket_births(bucket) {
            assert!(
                birth >= cutoff,
                "bucket {bucket}: birth {birth} below cutoff {cutoff}"
            );
            if bucket > 0 {
                assert!(
                    birth < cutoffs[bucket - 1],
                    "bucket {bucket}: birth {birth} young enough for bucket {}",
                    bucket - 1
                );
            }
        }
    }
}

#[test]
fn stable_aging_converges_and_meets_the_probe() {
    let mut rig = rig(
        160 * 1024,
        0.5,
        0.95,
        true,
        "1\n4096 1\n",
        "3\n0.33 1\n0.66 1\n1.0 1\n",
        "1\n0 1 0\n",
    );
    rig.engine.run_rapid_fill().expect("rapid fill");
    assert_eq!(rig.engine.fill_ticks(), 20);

    let trigger = rig.engine.run_stable_aging().expect("stable aging");
    assert!(
        matches!(trigger, AgingTrigger::Convergence | AgingTrigger::Accuracy),
        "unexpected trigger {trigger:?}"
    );
    assert!(rig.engine.tick().0 >= rig.engine.convergence_horizon());
    rig.engine.verify_consistency();

    // At the horizon the age distribution is as close to ideal as the
    // population allows; the probe accepts it.
    let goodness = rig.engine.current_goodness().expect("probe enabled");
    assert!(
        goodness <= agefs_dist::chi_squared_cdf(0.95, 2),
        "goodness {goodness} should meet the confidence threshold"
    );
}

#[test]
fn gap_driven_creates_alternate_between_equal_classes() {
    let mut rig = rig(
        100,
        1.0,
        0.0,
        true,
        "2\n1 0.5\n2 0.5\n",
        "2\n0.5 1\n1.0 1\n",
        "1\n0 1 0\n",
    );
    for _ in 0..60 {
        rig.engine.perform_op(true, None).expect("create");
        let counts = rig.engine.size_bucket_counts();
        let gap = counts[0].abs_diff(counts[1]);
        assert!(gap <= 1, "size classes drifted apart: {counts:?}");
    }
    rig.engine.verify_consistency();
}

#[test]
fn sibling_fanout_spreads_files_across_subdirectories() {
    let mut rig = rig(
        400 * 1024,
        0.5,
        0.0,
        true,
        "1\n1024 1\n",
        "2\n0.5 1\n1.0 1\n",
        "2\n0 0.25 0\n1 0.75 4\n",
    );
    rig.engine.run_rapid_fill().expect("rapid fill");
    let counts = rig.engine.dir_bucket_counts();
    let total = counts[0] + counts[1];
    assert_eq!(total, rig.engine.live_files());

    let deep_share = counts[1] as f64 / total as f64;
    assert!(
        (deep_share - 0.75).abs() < 0.05,
        "expected ~75% of files at depth 1, got {deep_share}"
    );

    // Depth-1 files spread roughly uniformly over the four siblings.
    let mut siblings = [0u64; 4];
    for info in rig.engine.live_file_snapshot() {
        if info.depth == 1 {
            for (slot, name) in siblings.iter_mut().zip(["d1/", "d2/", "d3/", "d4/"]) {
                if info.path.starts_with(name) {
                    *slot += 1;
                }
            }
        }
    }
    let deep_total: u64 = siblings.iter().sum();
    assert_eq!(deep_total, counts[1]);
    for (index, &count) in siblings.iter().enumerate() {
        let share = count as f64 / deep_total as f64;
        assert!(
            (0.12..=0.40).contains(&share),
            "sibling d{} holds {share} of deep files",
            index + 1
        );
    }
    rig.engine.verify_consistency();
}

#[test]
fn create_then_delete_restores_the_empty_state() {
    let mut rig = one_kib_rig(10 * 1024, 1.0);
    let initial_size_keys: Vec<GapKey> = rig.engine.size_view.keys().copied().collect();
    let initial_dir_keys: Vec<GapKey> = rig.engine.dir_view.keys().copied().collect();
    let initial_age_keys: Vec<GapKey> = rig.engine.age_view.keys().copied().collect();

    rig.engine.perform_op(true, None).expect("create");
    assert_eq!(rig.engine.live_files(), 1);
    rig.engine.perform_op(false, None).expect("delete");

    assert_eq!(rig.engine.tick().0, 2);
    assert_eq!(rig.engine.live_files(), 0);
    assert_eq!(rig.engine.live_bytes(), 0);
    assert_eq!(rig.engine.size_bucket_counts(), vec![0]);
    assert_eq!(rig.engine.dir_bucket_counts(), vec![0]);
    assert_eq!(rig.engine.age_bucket_counts(), vec![0, 0]);

    let size_keys: Vec<GapKey> = rig.engine.size_view.keys().copied().collect();
    let dir_keys: Vec<GapKey> = rig.engine.dir_view.keys().copied().collect();
    let age_keys: Vec<GapKey> = rig.engine.age_view.keys().copied().collect();
    assert_eq!(size_keys, initial_size_keys);
    assert_eq!(dir_keys, initial_dir_keys);
    assert_eq!(age_keys, initial_age_keys);
    rig.engine.verify_consistency();
}

#[test]
fn delete_with_no_live_files_reports_no_victim() {
    let mut rig = one_kib_rig(10 * 1024, 1.0);
    let err = rig.engine.perform_op(false, None).unwrap_err();
    assert!(matches!(err, AgeError::NoVictim));
}

#[test]
fn full_disk_converts_creates_into_deletes() {
    let mut rig = one_kib_rig(4 * 1024, 1.0);
    rig.engine.run_rapid_fill().expect("rapid fill");
    assert_eq!(rig.engine.live_files(), 4);

    // No class fits the remaining capacity, so the create frees space
    // instead, on the same tick.
    rig.engine.perform_op(true, None).expect("converted op");
    assert_eq!(rig.engine.live_files(), 3);
    assert_eq!(rig.engine.tick().0, 5);
    rig.engine.verify_consistency();
}

#[test]
fn interrupt_stops_stable_aging_and_tables_still_dump() {
    let mut rig = one_kib_rig(10 * 1024, 0.8);
    rig.engine.run_rapid_fill().expect("rapid fill");

    rig.engine.stop_flag().store(true, Ordering::Relaxed);
    let trigger = rig.engine.run_stable_aging().expect("stable aging");
    assert_eq!(trigger, AgingTrigger::Interrupted);

    rig.engine.write_distribution_tables().expect("dump");
    for (path, header) in [
        (&rig.engine.config.age_out, "BUCKET FRACTION TYPE"),
        (&rig.engine.config.size_out, "SIZE FRACTION TYPE"),
        (&rig.engine.config.dir_out, "DEPTH FRACTION TYPE"),
    ] {
        let text = std::fs::read_to_string(path).expect("table");
        assert_eq!(text.lines().next().expect("header"), header);
    }
}

#[test]
fn long_fake_workload_keeps_every_invariant() {
    let mut rig = rig(
        1024 * 1024,
        0.5,
        0.0,
        true,
        "2\n1024 1\n4096 3\n",
        "2\n0.5 1\n1.0 1\n",
        "2\n0 1 0\n1 1 2\n",
    );
    rig.engine.run_rapid_fill().expect("rapid fill");

    let mut coin = DeterministicRng::new(7);
    for step in 0..100_000u32 {
        let create = coin.next_usize(100) < 50;
        match rig.engine.perform_op(create, None) {
            Ok(()) => {}
            Err(AgeError::NoVictim) => break,
            Err(err) => panic!("unexpected engine error: {err}"),
        }
        let clock = rig.engine.tick().0;
        rig.engine.re_age(clock);
        if step % 10_000 == 0 {
            rig.engine.verify_consistency();
        }
    }
    rig.engine.verify_consistency();

    // Fake mode: the backend namespace stays empty.
    assert_eq!(rig.driver.file_count(), 0);
    assert_eq!(rig.driver.dir_count(), 0);
}

#[test]
fn workload_size_never_decreases() {
    let mut rig = one_kib_rig(20 * 1024, 0.5);
    rig.engine.run_rapid_fill().expect("rapid fill");
    let mut last = 0;
    let mut coin = DeterministicRng::new(3);
    for _ in 0..500 {
        let create = coin.next_usize(100) < 50;
        rig.engine.perform_op(create, None).expect("op");
        assert!(rig.engine.workload_bytes() >= last);
        assert!(rig.engine.live_bytes() <= 20 * 1024);
        last = rig.engine.workload_bytes();
    }
}

#[test]
fn duplicate_size_classes_are_rejected() {
    let out = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig {
        disk_capacity: 1024,
        utilization: 1.0,
        seed: 0,
        mount_point: PathBuf::from("/mnt"),
        workers: 1,
        runs: 1,
        fake: true,
        idle: false,
        confidence: 0.0,
        runtime_max_mins: 1.0,
        age_out: out.path().join("a"),
        size_out: out.path().join("s"),
        dir_out: out.path().join("d"),
    };
    let err = AgingEngine::new(
        config,
        sizes("2\n1024 1\n1024 2\n"),
        ages("2\n0.5 1\n1.0 1\n"),
        dirs("1\n0 1 0\n"),
        Arc::new(MemoryDriver::new()),
    )
    .map(drop)
    .unwrap_err();
    assert!(matches!(err, AgeError::Config(_)));
}

#[test]
fn convergence_horizon_matches_hand_computation() {
    let mut rig = one_kib_rig(10 * 1024, 1.0);
    rig.engine.run_rapid_fill().expect("rapid fill");
    // K = 10, ratios {0.5, 0}: per-bucket bound 2K·0.5/0.5 = 20, last
    // bucket bound is negative, and the floor clamp does not bind.
    assert_eq!(rig.engine.convergence_horizon(), 20);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn invariants_hold_under_random_operations(
        seed in 0u64..512,
        ops in proptest::collection::vec(any::<bool>(), 1..160),
    ) {
        let mut rig = rig(
            64 * 1024,
            0.25,
            0.0,
            true,
            "2\n512 1\n2048 1\n",
            "2\n0.5 1\n1.0 1\n",
            "2\n0 1 0\n1 1 2\n",
        );
        let mut jitter = DeterministicRng::new(seed);
        rig.engine.run_rapid_fill().expect("rapid fill");
        for &create in &ops {
            match rig.engine.perform_op(create, None) {
                Ok(()) => {}
                Err(AgeError::NoVictim) => break,
                Err(err) => panic!("unexpected engine error: {err}"),
            }
            if jitter.next_usize(4) == 0 {
                let clock = rig.engine.tick().0;
                rig.engine.re_age(clock);
            }
        }
        rig.engine.verify_consistency();
    }
}
