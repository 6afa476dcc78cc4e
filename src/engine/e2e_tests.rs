use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{DbDriver, Termination};
use crate::engine::event::TracingEventSink;
use crate::engine::executor::Executor;
use crate::engine::fake_sql::FakeSqlClient;
use crate::engine::ids::ThreadIdAllocator;
use crate::engine::scenario::ScenarioDriver;
use crate::engine::template;

async fn build_scenario(
    client: Arc<FakeSqlClient>,
    threads: usize,
    termination: Termination,
    pacing: Duration,
    ramp_up: Duration,
) -> ScenarioDriver {
    let compiled = template::compile("SELECT 1", "", DbDriver::Postgres).unwrap();
    let executor = Arc::new(Executor::build(compiled, client).await.unwrap());
    ScenarioDriver::new(
        Arc::from("s1"),
        1,
        threads,
        termination,
        ramp_up,
        pacing,
        executor,
        Arc::new(TracingEventSink),
    )
}

#[tokio::test]
async fn fixed_iteration_single_worker_no_pacing() {
    let client = Arc::new(FakeSqlClient::new(Duration::from_millis(1)));
    let scenario = build_scenario(client, 1, Termination::Iterations(100), Duration::ZERO, Duration::ZERO).await;
    let (scenario, result) = scenario.run(CancellationToken::new(), Arc::new(ThreadIdAllocator::new())).await;
    result.unwrap();

    let counters = scenario.counters();
    assert_eq!(counters.queries_total, 100);
    assert_eq!(counters.iterations_total, 100);
    assert_eq!(counters.errors_total, 0);
    assert_eq!(counters.rows_affected, 100);

    let derived = scenario.derived();
    assert_eq!(crate::report::format_rate(derived.success_rate), "100.00%");
    assert!(derived.min <= derived.p50 && derived.p50 <= derived.max);
}

#[tokio::test]
async fn balanced_iteration_split_across_three_workers() {
    let client = Arc::new(FakeSqlClient::new(Duration::ZERO));
    let scenario = build_scenario(client, 3, Termination::Iterations(10), Duration::ZERO, Duration::ZERO).await;
    let (scenario, result) = scenario.run(CancellationToken::new(), Arc::new(ThreadIdAllocator::new())).await;
    result.unwrap();
    assert_eq!(scenario.counters().queries_total, 10);
}

#[tokio::test]
async fn driver_error_every_third_query() {
    let client = Arc::new(FakeSqlClient::with_failures(Duration::ZERO, 3, "EOF"));
    let scenario = build_scenario(client, 2, Termination::Iterations(30), Duration::ZERO, Duration::ZERO).await;
    let (scenario, result) = scenario.run(CancellationToken::new(), Arc::new(ThreadIdAllocator::new())).await;
    result.unwrap();

    let counters = scenario.counters();
    assert_eq!(counters.queries_total, 30);
    assert_eq!(counters.errors_total, 20);
    assert_eq!(*counters.err_map.get("EOF").unwrap(), 20);

    let derived = scenario.derived();
    assert_eq!(derived.top_errors, vec![("EOF".to_string(), 20)]);
    assert_eq!(crate::report::format_rate(derived.success_rate), "33.33%");
}

#[tokio::test]
async fn duration_scenario_with_pacing_two_workers() {
    let client = Arc::new(FakeSqlClient::new(Duration::from_millis(20)));
    let scenario = build_scenario(
        client,
        2,
        Termination::Duration(Duration::from_secs(1)),
        Duration::from_millis(100),
        Duration::ZERO,
    )
    .await;
    let (scenario, result) = scenario.run(CancellationToken::new(), Arc::new(ThreadIdAllocator::new())).await;
    result.unwrap();

    // ~9-10 iterations per worker (floor(1000/100), plus slack for a cycle
    // caught in flight at the deadline), two workers.
    let counters = scenario.counters();
    assert!(
        (16..=22).contains(&counters.queries_total),
        "queries_total={}",
        counters.queries_total
    );

    let derived = scenario.derived();
    assert!((derived.qps - 20.0).abs() < 8.0, "qps={}", derived.qps);
}

#[tokio::test]
async fn ramp_up_clamped_to_minimum_tick() {
    let client = Arc::new(FakeSqlClient::new(Duration::ZERO));
    let scenario = build_scenario(
        client,
        100,
        Termination::Iterations(100),
        Duration::ZERO,
        Duration::from_millis(100),
    )
    .await;

    let started = tokio::time::Instant::now();
    let (scenario, result) = scenario.run(CancellationToken::new(), Arc::new(ThreadIdAllocator::new())).await;
    let elapsed = started.elapsed();
    result.unwrap();

    assert_eq!(scenario.counters().queries_total, 100);
    // ramp_up/threads = 1ms, clamped to the 10ms minimum tick; 100 threads launched
    // one tick apart each (including the first) gives a span of ~1000ms.
    assert!(elapsed >= Duration::from_millis(900), "elapsed={elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1400), "elapsed={elapsed:?}");
}

#[tokio::test]
async fn mid_run_cancellation_still_yields_partial_metrics() {
    let client = Arc::new(FakeSqlClient::new(Duration::from_millis(5)));
    let scenario = build_scenario(client, 2, Termination::Duration(Duration::from_secs(10)), Duration::ZERO, Duration::ZERO).await;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel_clone.cancel();
    });

    let started = tokio::time::Instant::now();
    let (scenario, result) = scenario.run(cancel, Arc::new(ThreadIdAllocator::new())).await;
    let elapsed = started.elapsed();

    assert!(result.is_ok(), "cancellation mid-run should not be a merge failure");
    assert!(scenario.counters().queries_total > 0);
    assert!(elapsed < Duration::from_millis(500));
}

#[tokio::test]
async fn errors_never_exceed_queries_and_sum_matches_counters() {
    let client = Arc::new(FakeSqlClient::with_failures(Duration::ZERO, 4, "boom"));
    let scenario = build_scenario(client, 4, Termination::Iterations(40), Duration::ZERO, Duration::ZERO).await;
    let (scenario, result) = scenario.run(CancellationToken::new(), Arc::new(ThreadIdAllocator::new())).await;
    result.unwrap();

    let counters = scenario.counters();
    assert!(counters.errors_total <= counters.queries_total);
    assert_eq!(counters.err_map.values().sum::<u64>(), counters.errors_total);
}
