#![allow(dead_code)]
#![allow(unused_imports)]
//! Helpers shared by the integration tests.
//!
//! Each test file pulls these in with `#[macro_use] mod common;` followed
//! by `use common::*;`.

use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::Once;
use std::time::{Duration, Instant};
use strand::executor::{PoolHandle, Propagating, ThreadPool};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Seed used for property tests on CI when none is given explicitly.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

/// Generous bound for waits that should finish almost immediately.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

const PROPTEST_SEED_ENV: &str = "STRAND_PROPTEST_SEED";

/// Proptest settings with `cases` cases and a reproducible seed on CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    // An explicit PROPTEST_RNG_SEED takes priority.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    std::env::var("CI").ok().map(|_| DEFAULT_PROPTEST_SEED)
}

/// Installs a trace-level test subscriber once per test binary.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Installs a test subscriber at `level` unless one is already installed.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// A pool plus its propagating wrapper. The pool shuts down on drop.
pub struct TestPool {
    pub pool: ThreadPool,
    pub exec: Propagating<PoolHandle>,
}

/// Starts a small pool for a test.
#[must_use]
pub fn test_pool(max_threads: usize) -> TestPool {
    let pool = ThreadPool::new(1, max_threads);
    let exec = Propagating::new(pool.handle());
    TestPool { pool, exec }
}

/// Polls `cond` until it holds or `timeout` elapses. Returns the final value.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Spins until the ambient job is cancelled, giving up after `timeout`.
/// Returns true if cancellation was seen.
pub fn wait_for_cancellation(timeout: Duration) -> bool {
    wait_until(timeout, strand::is_cancelled)
}

/// Marks the start of a test in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, ">>> {}", $name);
    };
}

/// Marks a test as having reached its end.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "<<< {} passed", $name);
    };
}

/// Asserts `cond`, logging the compared values first so a failure can be
/// read from the trace alone.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(expected = ?$expected, actual = ?$actual, "check: {}", $msg);
        assert!($cond, "{}: wanted {:?}, saw {:?}", $msg, $expected, $actual);
    };
}

/// Asserts a job outcome is `Ok`.
#[macro_export]
macro_rules! assert_outcome_ok {
    ($outcome:expr) => {
        match $outcome {
            ::strand::types::Outcome::Ok(_) => {}
            other => panic!("job did not complete normally: {:?}", other),
        }
    };
}

/// Asserts a job outcome is `Cancelled`, optionally of a given kind.
#[macro_export]
macro_rules! assert_outcome_cancelled {
    ($outcome:expr) => {
        match $outcome {
            ::strand::types::Outcome::Cancelled(_) => {}
            other => panic!("job was not cancelled: {:?}", other),
        }
    };
    ($outcome:expr, $kind:expr) => {
        match $outcome {
            ::strand::types::Outcome::Cancelled(reason) => assert_eq!(reason.kind(), $kind),
            other => panic!("job was not cancelled: {:?}", other),
        }
    };
}

/// Asserts a job outcome is `Err`.
#[macro_export]
macro_rules! assert_outcome_err {
    ($outcome:expr) => {
        match $outcome {
            ::strand::types::Outcome::Err(_) => {}
            other => panic!("job did not fail: {:?}", other),
        }
    };
}
