//! Communication test suite
//!
//! Drives the collective operations against the peer node and reports
//! pass/fail per test. Each test opens its own process group and tears
//! it down exactly once, whether the test passes or fails, so a failed
//! run never leaves a dangling listener behind.

use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};

use crate::comm::{GroupConfig, ProcessGroup, ReduceOp};
use crate::config::CheckConfig;
use crate::error::Result;

/// Tolerance for float comparisons after a collective round trip
const EPSILON: f32 = 1e-6;

/// The individual tests the suite can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCase {
    AllReduce,
    Broadcast,
    SendRecv,
    Gather,
}

impl TestCase {
    /// All tests in suite order
    pub fn all() -> [TestCase; 4] {
        [
            TestCase::AllReduce,
            TestCase::Broadcast,
            TestCase::SendRecv,
            TestCase::Gather,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            TestCase::AllReduce => "all_reduce",
            TestCase::Broadcast => "broadcast",
            TestCase::SendRecv => "send_recv",
            TestCase::Gather => "gather",
        }
    }
}

/// Outcome of one test
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test: TestCase,
    pub passed: bool,
    pub duration_ms: u64,
    pub detail: String,
}

/// Outcome of a whole suite run
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub rank: u32,
    pub results: Vec<TestResult>,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }
}

fn approx_eq(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < EPSILON)
}

fn check(name: &str, got: &[f32], want: &[f32]) -> std::result::Result<String, String> {
    if approx_eq(got, want) {
        Ok(format!("{}: {:?}", name, got))
    } else {
        Err(format!("{}: got {:?}, want {:?}", name, got, want))
    }
}

/// Run one test case over an established group.
///
/// The input values are fixed so both ranks can verify the result
/// independently, without exchanging expectations out of band.
async fn exercise(group: &mut ProcessGroup, case: TestCase) -> Result<std::result::Result<String, String>> {
    let rank = group.rank();

    let outcome = match case {
        TestCase::AllReduce => {
            // rank 0 holds [1, 2], rank 1 holds [2, 3]; sum is [3, 5]
            let local: Vec<f32> = match rank {
                0 => vec![1.0, 2.0],
                _ => vec![2.0, 3.0],
            };
            let reduced = group.all_reduce(&local, ReduceOp::Sum).await?;
            check("sum", &reduced, &[3.0, 5.0])
        }

        TestCase::Broadcast => {
            // rank 0 is the root; both ranks must end with its tensor
            let payload = vec![100.0, 200.0, 300.0];
            let received = group.broadcast(&payload, 0).await?;
            check("broadcast", &received, &payload)
        }

        TestCase::SendRecv => {
            // rank 0 sends, rank 1 receives and verifies
            let payload = vec![1.5, 2.5, 3.5];
            if rank == 0 {
                group.send(&payload).await?;
                Ok("sent 3 values".to_string())
            } else {
                let received = group.recv().await?;
                check("recv", &received, &payload)
            }
        }

        TestCase::Gather => {
            // each rank contributes [rank + 1]; rank 0 collects both
            let local = vec![(rank + 1) as f32];
            match group.gather(&local, 0).await? {
                Some(gathered) => {
                    if gathered == vec![vec![1.0], vec![2.0]] {
                        Ok(format!("gathered {:?}", gathered))
                    } else {
                        Err(format!("gather: got {:?}, want [[1.0], [2.0]]", gathered))
                    }
                }
                None => Ok(format!("contributed {:?}", local)),
            }
        }
    };

    // Keep the ranks aligned before teardown so a fast rank does not
    // close the connection while the peer is still mid-exchange.
    group.barrier().await?;

    Ok(outcome)
}

/// Run a single test case in its own process group
pub async fn run_case(config: &CheckConfig, rank: u32, case: TestCase) -> TestResult {
    let started = Instant::now();
    info!(test = case.name(), rank, "starting test");

    let result = run_case_inner(config, rank, case).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(detail) => {
            info!(test = case.name(), duration_ms, "test passed");
            TestResult {
                test: case,
                passed: true,
                duration_ms,
                detail,
            }
        }
        Err(detail) => {
            error!(test = case.name(), duration_ms, detail = %detail, "test failed");
            TestResult {
                test: case,
                passed: false,
                duration_ms,
                detail,
            }
        }
    }
}

async fn run_case_inner(
    config: &CheckConfig,
    rank: u32,
    case: TestCase,
) -> std::result::Result<String, String> {
    let group_config = GroupConfig::from_config(config, rank).map_err(|e| e.format_for_log())?;
    let mut group = ProcessGroup::init(group_config)
        .await
        .map_err(|e| e.format_for_log())?;

    let outcome = exercise(&mut group, case).await;

    // Shutdown runs exactly once on every path out of the test
    let teardown = group.shutdown().await;

    let outcome = outcome.map_err(|e| e.format_for_log())?;
    teardown.map_err(|e| e.format_for_log())?;
    outcome
}

/// Run the full suite, one fresh group per test, pausing between tests
/// so the master port is released before the next bind.
pub async fn run_suite(config: &CheckConfig, rank: u32) -> SuiteReport {
    let cases = TestCase::all();
    let mut results = Vec::with_capacity(cases.len());

    for (i, case) in cases.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(config.settle_delay()).await;
        }
        results.push(run_case(config, rank, *case).await);
    }

    SuiteReport { rank, results }
}

/// Single-pass variant: one group, all four test patterns back to back.
/// This is the quick smoke test for an explicitly chosen rank.
pub async fn single_pass(config: &CheckConfig, rank: u32) -> Result<SuiteReport> {
    let group_config = GroupConfig::from_config(config, rank)?;
    let mut group = ProcessGroup::init(group_config).await?;

    let mut results = Vec::new();
    let mut failure = None;

    for case in TestCase::all() {
        let started = Instant::now();
        match exercise(&mut group, case).await {
            Ok(outcome) => {
                let passed = outcome.is_ok();
                let detail = match outcome {
                    Ok(d) | Err(d) => d,
                };
                if passed {
                    info!(test = case.name(), "test passed");
                } else {
                    error!(test = case.name(), detail = %detail, "test failed");
                }
                results.push(TestResult {
                    test: case,
                    passed,
                    duration_ms: started.elapsed().as_millis() as u64,
                    detail,
                });
            }
            Err(e) => {
                error!(test = case.name(), error = %e, "test aborted");
                results.push(TestResult {
                    test: case,
                    passed: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                    detail: e.format_for_log(),
                });
                failure = Some(e);
                break;
            }
        }
    }

    group.shutdown().await?;

    if let Some(e) = failure {
        return Err(e);
    }

    Ok(SuiteReport { rank, results })
}
