//! Loopback integration tests
//!
//! Runs both ranks of the process group inside one process over
//! 127.0.0.1, exercising the full init / collective / teardown cycle
//! without needing a second machine.

use std::net::SocketAddr;
use std::time::Duration;

use comm_check::comm::{GroupConfig, ProcessGroup, ReduceOp};
use comm_check::config::CheckConfig;
use comm_check::error::Error;
use comm_check::suite::{self, TestCase};

fn loopback_config(port: u16) -> CheckConfig {
    let mut config = CheckConfig::default();
    config.cluster.master_addr = "127.0.0.1".to_string();
    config.cluster.master_port = port;
    config.comm.init_timeout_ms = 5_000;
    config.comm.op_timeout_ms = 5_000;
    config.comm.settle_delay_ms = 50;
    config
}

fn group_config(port: u16, rank: u32) -> GroupConfig {
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    GroupConfig {
        rank,
        master_addr: addr,
        init_timeout: Duration::from_secs(5),
        op_timeout: Duration::from_secs(5),
    }
}

async fn connect_pair(port: u16) -> (ProcessGroup, ProcessGroup) {
    let (g0, g1) = tokio::join!(
        ProcessGroup::init(group_config(port, 0)),
        ProcessGroup::init(group_config(port, 1))
    );
    (g0.unwrap(), g1.unwrap())
}

// ─────────────────────────────────────────────────────────────────
// Collective Semantics
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_all_reduce_sums_across_ranks() {
    let (mut g0, mut g1) = connect_pair(43400).await;

    let (r0, r1) = tokio::join!(
        g0.all_reduce(&[1.0, 2.0], ReduceOp::Sum),
        g1.all_reduce(&[2.0, 3.0], ReduceOp::Sum)
    );

    // Both ranks converge on the same reduced tensor
    assert_eq!(r0.unwrap(), vec![3.0, 5.0]);
    assert_eq!(r1.unwrap(), vec![3.0, 5.0]);

    let _ = tokio::join!(g0.shutdown(), g1.shutdown());
}

#[tokio::test]
async fn test_all_reduce_max() {
    let (mut g0, mut g1) = connect_pair(43401).await;

    let (r0, r1) = tokio::join!(
        g0.all_reduce(&[1.0, 9.0], ReduceOp::Max),
        g1.all_reduce(&[4.0, 3.0], ReduceOp::Max)
    );
    assert_eq!(r0.unwrap(), vec![4.0, 9.0]);
    assert_eq!(r1.unwrap(), vec![4.0, 9.0]);

    let _ = tokio::join!(g0.shutdown(), g1.shutdown());
}

#[tokio::test]
async fn test_broadcast_reaches_both_ranks() {
    let (mut g0, mut g1) = connect_pair(43402).await;

    let (r0, r1) = tokio::join!(
        g0.broadcast(&[100.0, 200.0, 300.0], 0),
        g1.broadcast(&[], 0)
    );
    assert_eq!(r0.unwrap(), vec![100.0, 200.0, 300.0]);
    assert_eq!(r1.unwrap(), vec![100.0, 200.0, 300.0]);

    let _ = tokio::join!(g0.shutdown(), g1.shutdown());
}

#[tokio::test]
async fn test_point_to_point_transfer() {
    let (mut g0, mut g1) = connect_pair(43403).await;

    let (sent, received) = tokio::join!(g0.send(&[1.5, 2.5, 3.5]), g1.recv());
    sent.unwrap();
    assert_eq!(received.unwrap(), vec![1.5, 2.5, 3.5]);

    let _ = tokio::join!(g0.shutdown(), g1.shutdown());
}

#[tokio::test]
async fn test_gather_collects_in_rank_order() {
    let (mut g0, mut g1) = connect_pair(43404).await;

    let (r0, r1) = tokio::join!(g0.gather(&[1.0], 0), g1.gather(&[2.0], 0));

    // Destination sees both tensors ordered by rank, the other rank none
    assert_eq!(r0.unwrap(), Some(vec![vec![1.0], vec![2.0]]));
    assert_eq!(r1.unwrap(), None);

    let _ = tokio::join!(g0.shutdown(), g1.shutdown());
}

#[tokio::test]
async fn test_multiple_collectives_on_one_group() {
    let (mut g0, mut g1) = connect_pair(43405).await;

    let (r0, r1) = tokio::join!(
        g0.all_reduce(&[1.0], ReduceOp::Sum),
        g1.all_reduce(&[2.0], ReduceOp::Sum)
    );
    assert_eq!(r0.unwrap(), vec![3.0]);
    assert_eq!(r1.unwrap(), vec![3.0]);

    let (b0, b1) = tokio::join!(g0.barrier(), g1.barrier());
    b0.unwrap();
    b1.unwrap();

    let (r0, r1) = tokio::join!(g0.broadcast(&[7.0], 0), g1.broadcast(&[], 0));
    assert_eq!(r0.unwrap(), vec![7.0]);
    assert_eq!(r1.unwrap(), vec![7.0]);

    let _ = tokio::join!(g0.shutdown(), g1.shutdown());
}

// ─────────────────────────────────────────────────────────────────
// Failure Handling
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rank0_accept_times_out_without_peer() {
    let mut config = group_config(43406, 0);
    config.init_timeout = Duration::from_millis(200);

    let err = ProcessGroup::init(config).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout { .. }));
}

#[tokio::test]
async fn test_rank1_gives_up_when_no_master() {
    let mut config = group_config(43407, 1);
    config.init_timeout = Duration::from_millis(200);

    let err = ProcessGroup::init(config).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout { .. }));
}

#[tokio::test]
async fn test_handshake_rejects_duplicate_rank() {
    use comm_check::comm::Frame;
    use tokio::io::AsyncWriteExt;

    let init = ProcessGroup::init(group_config(43409, 0));

    let imposter = async {
        // Connect like rank 1 would, but claim rank 0
        let mut stream = loop {
            match tokio::net::TcpStream::connect("127.0.0.1:43409").await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        };
        let hello = Frame::Hello {
            rank: 0,
            world_size: 2,
            session: uuid::Uuid::new_v4(),
        };
        let json = serde_json::to_vec(&hello).unwrap();
        stream.write_u32(json.len() as u32).await.unwrap();
        stream.write_all(&json).await.unwrap();
        stream
    };

    let (result, _stream) = tokio::join!(init, imposter);
    assert!(matches!(result.unwrap_err(), Error::PeerMismatch { .. }));
}

#[tokio::test]
async fn test_peer_disappearing_mid_collective() {
    let (mut g0, g1) = connect_pair(43408).await;

    // Rank 1 goes away cleanly; rank 0 is still waiting for data
    g1.shutdown().await.unwrap();

    let err = g0.recv().await.unwrap_err();
    assert!(matches!(
        err,
        Error::ProtocolUnexpected { .. } | Error::CollectiveFailed { .. }
    ));
}

// ─────────────────────────────────────────────────────────────────
// Suite Orchestration
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_suite_case_passes_on_both_ranks() {
    let config = loopback_config(43410);

    let (r0, r1) = tokio::join!(
        suite::run_case(&config, 0, TestCase::AllReduce),
        suite::run_case(&config, 1, TestCase::AllReduce)
    );
    assert!(r0.passed, "rank 0: {}", r0.detail);
    assert!(r1.passed, "rank 1: {}", r1.detail);
}

#[tokio::test]
async fn test_suite_case_reports_failure_without_peer() {
    let mut config = loopback_config(43411);
    config.comm.init_timeout_ms = 200;

    // Only rank 0 runs; the group can never form
    let result = suite::run_case(&config, 0, TestCase::Broadcast).await;
    assert!(!result.passed);
    assert!(result.detail.contains("E3"), "detail: {}", result.detail);
}

#[tokio::test]
async fn test_full_suite_over_loopback() {
    let config = loopback_config(43412);

    let (r0, r1) = tokio::join!(suite::run_suite(&config, 0), suite::run_suite(&config, 1));

    assert_eq!(r0.results.len(), 4);
    assert_eq!(r1.results.len(), 4);
    assert!(r0.all_passed(), "rank 0 failures: {:?}", r0.results);
    assert!(r1.all_passed(), "rank 1 failures: {:?}", r1.results);
}

#[tokio::test]
async fn test_single_pass_over_loopback() {
    let config = loopback_config(43413);

    let (r0, r1) = tokio::join!(
        suite::single_pass(&config, 0),
        suite::single_pass(&config, 1)
    );

    let r0 = r0.unwrap();
    let r1 = r1.unwrap();
    assert_eq!(r0.results.len(), 4);
    assert!(r0.all_passed());
    assert!(r1.all_passed());
}

#[tokio::test]
async fn test_single_pass_covers_all_four_patterns() {
    let config = loopback_config(43415);

    let (r0, r1) = tokio::join!(
        suite::single_pass(&config, 0),
        suite::single_pass(&config, 1)
    );

    let cases: Vec<TestCase> = r0.unwrap().results.iter().map(|r| r.test).collect();
    assert!(cases.contains(&TestCase::Gather), "cases: {:?}", cases);
    assert_eq!(cases, TestCase::all().to_vec());
    assert!(r1.unwrap().all_passed());
}

#[tokio::test]
async fn test_single_pass_rejects_out_of_range_rank() {
    let config = loopback_config(43414);

    let err = suite::single_pass(&config, 7).await.unwrap_err();
    assert!(matches!(err, Error::RankInvalid { .. }));
}
