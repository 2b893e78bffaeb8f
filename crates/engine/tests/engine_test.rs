//! End-to-end tests for the engine's public entry points.
//!
//! Every test injects a `StaticProbe` so limits do not depend on the host.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use fanout_engine::{
    AggregateSummary, DependencyGraph, Engine, EngineConfig, JobState, StaticProbe, WorkError,
    WorkItem, WorkOutput, WorkloadClass,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn engine_with(probe: Arc<StaticProbe>) -> Engine {
    Engine::with_probe(EngineConfig::default(), probe).unwrap()
}

fn engine(cpus: usize) -> Engine {
    engine_with(Arc::new(StaticProbe::new(cpus, 40.0)))
}

async fn flaky(n: u32) -> WorkOutput {
    match n % 4 {
        0 => Ok(json!(n)),
        1 => Err(WorkError::failed(format!("item {n} failed"))),
        2 => panic!("item {n} panicked"),
        _ => {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(json!(n))
        }
    }
}

// ── Throttle ────────────────────────────────────────────────────────

#[test]
fn cpu_limit_on_eight_cores() {
    assert_eq!(engine(8).compute_throttle(WorkloadClass::Cpu, 32, 1.0).unwrap(), 8);
}

#[test]
fn io_limit_capped_by_max() {
    assert_eq!(engine(8).compute_throttle(WorkloadClass::Io, 4, 1.0).unwrap(), 4);
}

#[test]
fn limit_always_within_bounds() {
    for cpus in [0, 1, 2, 3, 7, 16, 128] {
        for pressure in [0.0, 50.0, 85.0, 99.9, 100.0] {
            let e = engine_with(Arc::new(StaticProbe::new(cpus, pressure)));
            for class in WorkloadClass::ALL {
                for max in [1, 2, 5, 64] {
                    for load in [0.1, 0.35, 1.0] {
                        let limit = e.compute_throttle(class, max, load).unwrap();
                        assert!(
                            (1..=max).contains(&limit),
                            "{class} cpus={cpus} pressure={pressure} max={max} load={load} -> {limit}"
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn rising_pressure_never_raises_limit() {
    let probe = Arc::new(StaticProbe::new(12, 75.0));
    let e = engine_with(Arc::clone(&probe));
    for class in WorkloadClass::ALL {
        e.throttle().invalidate();
        let relaxed = e.compute_throttle(class, 64, 1.0).unwrap();

        probe.set_memory_pressure(95.0);
        e.throttle().invalidate();
        let strained = e.compute_throttle(class, 64, 1.0).unwrap();
        probe.set_memory_pressure(75.0);

        assert!(strained <= relaxed, "{class}: {strained} > {relaxed}");
    }
}

#[test]
fn failed_memory_query_uses_fallback() {
    let e = engine_with(Arc::new(StaticProbe::failing(4)));
    let decision = e.throttle_decision(WorkloadClass::Cpu, 32, 1.0).unwrap();
    assert_eq!(decision.limit, 4);
    assert_eq!(decision.snapshot.memory_pressure, 50.0);
    assert_eq!(decision.snapshot.reduction_factor, 1.0);
}

// ── Worker pool ─────────────────────────────────────────────────────

#[tokio::test]
async fn throttling_is_enforced() {
    let items = WorkItem::batch(vec![100u64; 10], |ms: u64| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    });

    let started = Instant::now();
    let results = engine(8).run_parallel(items, 2, Some(TIMEOUT)).await.unwrap();
    assert_eq!(results.len(), 10);
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn result_count_matches_item_count() {
    let e = engine(4);
    for limit in [1, 3, 16] {
        for timeout in [Duration::from_millis(1), TIMEOUT] {
            let items = WorkItem::batch(0..12u32, flaky);
            let results = e.run_parallel(items, limit, Some(timeout)).await.unwrap();
            assert_eq!(results.len(), 12, "limit={limit} timeout={timeout:?}");
            assert!(results.iter().all(|r| r.state.is_terminal()));
        }
    }
}

#[tokio::test]
async fn empty_run_is_not_an_error() {
    let results = engine(4)
        .run_parallel(Vec::<WorkItem<u32>>::new(), 4, None)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn siblings_unaffected_by_failures() {
    let results = engine(4)
        .run_parallel(WorkItem::batch(0..16u32, flaky), 4, Some(TIMEOUT))
        .await
        .unwrap();

    for (n, r) in results.iter().enumerate() {
        assert_eq!(r.id, format!("item-{n}"));
        match n % 4 {
            1 | 2 => {
                assert_eq!(r.state, JobState::Failed);
                assert!(r.has_errors);
            }
            _ => {
                assert!(r.is_success());
                assert_eq!(r.output, Some(json!(n)));
            }
        }
    }
}

// ── Background jobs ─────────────────────────────────────────────────

#[tokio::test]
async fn overdue_job_reported_not_dropped() {
    let e = engine(4);
    let handles = vec![
        e.submit_job("quick", |_: ()| async { Ok(Value::Null) }, ()),
        e.submit_job(
            "overdue",
            |_: ()| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            },
            (),
        ),
    ];

    let results = e.await_jobs(handles, Some(Duration::from_millis(100))).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].state, JobState::Completed);
    assert_eq!(results[1].state, JobState::TimedOut);
    assert_eq!(results[1].name, "overdue");
    assert_eq!(e.metrics().active_jobs, 0);
}

// ── Partitioning ────────────────────────────────────────────────────

#[test]
fn partitions_respect_every_invariant() {
    let e = engine(4);
    let depends = |a: &u32, b: &u32| a.abs_diff(*b) == 1 || (a + b) % 7 == 0;
    let input: Vec<u32> = (0..30).collect();
    let groups = e.partition_by_dependency(input.clone(), depends, 4).unwrap();

    let mut seen: Vec<u32> = groups.iter().flatten().copied().collect();
    seen.sort_unstable();
    assert_eq!(seen, input);
    for group in &groups {
        assert!(!group.is_empty() && group.len() <= 4);
        for a in group {
            for b in group {
                if a != b {
                    assert!(!depends(a, b) && !depends(b, a), "{a} and {b} grouped together");
                }
            }
        }
    }
    assert_eq!(groups, e.partition_by_dependency(input, depends, 4).unwrap());
}

#[tokio::test]
async fn partitioned_run_returns_every_result() {
    let graph: DependencyGraph = [("item-0", "item-1"), ("item-1", "item-2")]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    let items = WorkItem::batch(0..5u32, |n: u32| async move { Ok(json!(n)) });
    let results = engine(4)
        .run_partitioned(items, &graph, 2, 2, Some(TIMEOUT))
        .await
        .unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["item-0", "item-2", "item-1", "item-3", "item-4"]);
}

// ── Adaptive ────────────────────────────────────────────────────────

#[tokio::test]
async fn adaptive_run_completes_all_slices() {
    let e = engine(2);
    let items = WorkItem::batch(0..45u32, |n: u32| async move {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(json!(n))
    });
    let results = e
        .run_adaptive_parallel(items, WorkloadClass::Mixed, None, 6, 4)
        .await
        .unwrap();
    assert_eq!(results.len(), 45);
    let current = e.metrics().current_limit;
    assert!((1..=6).contains(&current));
}

// ── Aggregation ─────────────────────────────────────────────────────

#[test]
fn empty_merge_is_vacuous_success() {
    let summary = engine(1).merge_results(&[]);
    assert_eq!(
        (summary.total, summary.passed, summary.failed, summary.skipped),
        (0, 0, 0, 0)
    );
    assert!(summary.success);
}

#[tokio::test]
async fn merge_is_associative_over_real_results() {
    let e = engine(4);
    let mut results = e
        .run_parallel(WorkItem::batch(0..10u32, flaky), 3, Some(TIMEOUT))
        .await
        .unwrap();
    results.extend(
        e.run_parallel(
            WorkItem::batch(0..3u32, |n: u32| async move {
                Ok(json!({ "passed": n, "failed": 1, "failures": [format!("case {n}")] }))
            }),
            3,
            Some(TIMEOUT),
        )
        .await
        .unwrap(),
    );

    let whole = AggregateSummary::merge(&results);
    let (a, b) = results.split_at(6);
    assert_eq!(AggregateSummary::merge(a).combine(AggregateSummary::merge(b)), whole);
    assert!(!whole.success);
    assert_eq!(whole.total, whole.passed + whole.failed + whole.skipped);
}

// ── Configuration ───────────────────────────────────────────────────

#[tokio::test]
async fn engine_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[throttle]\ndefault_max_limit = 3\n\n[pool]\ntimeout_seconds = 1\n"
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    let e = Engine::with_probe(config, Arc::new(StaticProbe::new(16, 10.0))).unwrap();
    assert_eq!(e.default_throttle(WorkloadClass::Network).unwrap(), 3);

    let items = WorkItem::batch(vec![5_000u64], |ms: u64| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Value::Null)
    });
    let results = e.run_parallel(items, 1, None).await.unwrap();
    assert_eq!(results[0].state, JobState::TimedOut);
}
