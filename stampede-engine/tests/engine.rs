//! End-to-end tests: samples go in through the ingester, thresholds are
//! evaluated, and the snapshot API reports what happened.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use approx::assert_relative_eq;
use stampede_engine::{MetricsEngine, Output, RuntimeOptions, SystemTagSet, TestRunState};
use stampede_metrics::{
    Metric, MetricKind, Registry, Sample, Samples, Sink, Threshold, Thresholds, ValueType,
};

fn test_state(registry: Registry, thresholds: HashMap<String, Thresholds>) -> TestRunState {
    TestRunState {
        registry,
        thresholds,
        runtime_options: RuntimeOptions::default(),
        system_tags: SystemTagSet::NONE,
    }
}

fn thresholds(specs: &[(&str, bool)]) -> Thresholds {
    Thresholds::new(
        specs
            .iter()
            .map(|(expr, abort)| Threshold::new(expr, *abort, None).unwrap())
            .collect(),
    )
}

fn sample_at(registry: &Registry, metric: &Metric, value: f64, at_secs: u64) -> Sample {
    Sample {
        metric: metric.clone(),
        time: UNIX_EPOCH + Duration::from_secs(at_secs),
        value,
        tags: registry.root_tag_set(),
    }
}

#[test]
fn counter_threshold_passes() {
    let registry = Registry::new();
    let iterations =
        registry.must_new_metric("iterations", MetricKind::Counter, ValueType::Default);

    let config = HashMap::from([("iterations".to_string(), thresholds(&[("count > 2", false)]))]);
    let engine =
        Arc::new(MetricsEngine::new(test_state(registry.clone(), config)).unwrap());

    let mut ingester = engine.create_ingester();
    ingester.start().unwrap();
    ingester.add_metric_samples(vec![Samples(vec![
        sample_at(&registry, &iterations, 1.0, 1),
        sample_at(&registry, &iterations, 1.0, 2),
        sample_at(&registry, &iterations, 1.0, 3),
    ])]);

    let calculations = engine
        .start_threshold_calculations(|_| panic!("unexpected abort"), || Duration::from_secs(4))
        .unwrap();
    let breached = calculations.finalize();
    assert_eq!(breached, Vec::<String>::new());
    assert_eq!(engine.metrics_with_breached_thresholds_count(), 0);

    let observed = engine.observed_metric_by_id("iterations").unwrap();
    assert!(!observed.tainted);
    let mut sink = observed.sink;
    let formatted = sink.format(Duration::from_secs(4));
    assert_relative_eq!(formatted["count"], 3.0);
    assert_relative_eq!(formatted["rate"], 0.75);
}

#[test]
fn trend_p95_breach_taints_the_metric() {
    let registry = Registry::new();
    let duration =
        registry.must_new_metric("http_req_duration", MetricKind::Trend, ValueType::Time);

    let config = HashMap::from([(
        "http_req_duration".to_string(),
        thresholds(&[("p(95) < 200", false)]),
    )]);
    let engine =
        Arc::new(MetricsEngine::new(test_state(registry.clone(), config)).unwrap());

    let mut ingester = engine.create_ingester();
    ingester.start().unwrap();
    let values = [100.0, 110.0, 120.0, 130.0, 140.0, 150.0, 160.0, 170.0, 180.0, 500.0];
    ingester.add_metric_samples(vec![Samples(
        values
            .iter()
            .enumerate()
            .map(|(i, v)| sample_at(&registry, &duration, *v, i as u64))
            .collect(),
    )]);

    let calculations = engine
        .start_threshold_calculations(|_| {}, || Duration::from_secs(10))
        .unwrap();
    let breached = calculations.finalize();
    assert_eq!(breached, vec!["http_req_duration".to_string()]);
    assert_eq!(engine.metrics_with_breached_thresholds_count(), 1);

    let observed = engine.observed_metric_by_id("http_req_duration").unwrap();
    assert!(observed.tainted);
    match observed.sink {
        Sink::Trend(mut trend) => {
            assert_relative_eq!(trend.p(0.95), 180.0 + 0.55 * (500.0 - 180.0));
        }
        other => panic!("expected a trend sink, got {other:?}"),
    }
}

#[test]
fn abort_on_fail_invokes_the_abort_callback_once_per_tick() {
    let registry = Registry::new();
    let checks = registry.must_new_metric("checks", MetricKind::Rate, ValueType::Default);

    let config = HashMap::from([("checks".to_string(), thresholds(&[("rate > 0.9", true)]))]);
    let engine =
        Arc::new(MetricsEngine::new(test_state(registry.clone(), config)).unwrap());

    let mut ingester = engine.create_ingester();
    ingester.start().unwrap();
    ingester.add_metric_samples(vec![Samples(
        (0..10u64)
            .map(|i| sample_at(&registry, &checks, (i % 2) as f64, i))
            .collect(),
    )]);

    let aborts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&aborts);
    let calculations = engine
        .start_threshold_calculations(
            move |err| {
                assert!(err.to_string().contains("checks"));
                seen.fetch_add(1, Ordering::SeqCst);
            },
            || Duration::from_secs(30),
        )
        .unwrap();

    // One ticker period plus slack: exactly one evaluation fires, and it must
    // invoke the abort callback exactly once.
    thread::sleep(Duration::from_millis(2500));
    assert_eq!(aborts.load(Ordering::SeqCst), 1);

    let breached = calculations.finalize();
    assert_eq!(breached, vec!["checks".to_string()]);
}

#[test]
fn samples_are_routed_to_matching_submetrics() {
    let registry = Registry::new();
    let http_reqs =
        registry.must_new_metric("http_reqs", MetricKind::Counter, ValueType::Default);

    let config = HashMap::from([(
        "http_reqs{status:\"500\"}".to_string(),
        thresholds(&[("count < 10", false)]),
    )]);
    let engine =
        Arc::new(MetricsEngine::new(test_state(registry.clone(), config)).unwrap());

    let root = registry.root_tag_set();
    let mut ingester = engine.create_ingester();
    ingester.start().unwrap();
    ingester.add_metric_samples(vec![Samples(vec![
        Sample {
            metric: http_reqs.clone(),
            time: UNIX_EPOCH + Duration::from_secs(1),
            value: 1.0,
            tags: root.with("status", "500"),
        },
        Sample {
            metric: http_reqs.clone(),
            time: UNIX_EPOCH + Duration::from_secs(2),
            value: 1.0,
            tags: root.with("status", "200"),
        },
        Sample {
            metric: http_reqs.clone(),
            time: UNIX_EPOCH + Duration::from_secs(3),
            value: 1.0,
            tags: root.with("status", "500").with("method", "GET"),
        },
    ])]);
    ingester.stop().unwrap();
    // Stopping twice is fine.
    ingester.stop().unwrap();

    let parent = engine.observed_metric_by_id("http_reqs").unwrap();
    let sub = engine.observed_metric_by_id("http_reqs{status:500}").unwrap();

    let mut parent_sink = parent.sink;
    let mut sub_sink = sub.sink;
    let elapsed = Duration::from_secs(10);
    assert_relative_eq!(parent_sink.format(elapsed)["count"], 3.0);
    assert_relative_eq!(sub_sink.format(elapsed)["count"], 2.0);
}

#[test]
fn no_thresholds_means_no_ticker() {
    let registry = Registry::new();
    registry.must_new_metric("iterations", MetricKind::Counter, ValueType::Default);

    let engine = Arc::new(MetricsEngine::new(test_state(registry, HashMap::new())).unwrap());
    assert!(engine
        .start_threshold_calculations(|_| {}, || Duration::ZERO)
        .is_none());
}

#[test]
fn finalize_evaluates_empty_sinks() {
    let registry = Registry::new();
    registry.must_new_metric("iterations", MetricKind::Counter, ValueType::Default);

    // No samples ever arrive, so every periodic tick skips the empty sink.
    // The final evaluation does not, and `count > 2` fails on an empty
    // counter.
    let config = HashMap::from([("iterations".to_string(), thresholds(&[("count > 2", false)]))]);
    let engine = Arc::new(MetricsEngine::new(test_state(registry, config)).unwrap());

    let calculations = engine
        .start_threshold_calculations(|_| panic!("unexpected abort"), || Duration::from_secs(1))
        .unwrap();
    let breached = calculations.finalize();
    assert_eq!(breached, vec!["iterations".to_string()]);

    let observed = engine.observed_metric_by_id("iterations").unwrap();
    assert!(observed.tainted);
}

#[test]
fn snapshots_are_consistent_under_concurrent_ingestion() {
    let registry = Registry::new();
    let duration =
        registry.must_new_metric("http_req_duration", MetricKind::Trend, ValueType::Time);
    let checks = registry.must_new_metric("checks", MetricKind::Rate, ValueType::Default);

    let engine =
        Arc::new(MetricsEngine::new(test_state(registry.clone(), HashMap::new())).unwrap());
    let mut ingester = engine.create_ingester();
    ingester.start().unwrap();

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let registry = registry.clone();
            let duration = duration.clone();
            let checks = checks.clone();
            let mut ingester = ingester.clone();
            thread::spawn(move || {
                for i in 0..200u64 {
                    ingester.add_metric_samples(vec![Samples(vec![
                        sample_at(&registry, &duration, (p * 100 + i) as f64, i),
                        sample_at(&registry, &checks, (i % 3).min(1) as f64, i),
                    ])]);
                }
            })
        })
        .collect();

    // Read snapshots while the producers are still writing.
    for _ in 0..50 {
        for observed in engine.observed_metrics().values() {
            match observed.sink.clone() {
                Sink::Trend(mut trend) => {
                    if !trend.is_empty() {
                        assert!(trend.min() <= trend.avg());
                        assert!(trend.avg() <= trend.max());
                    }
                }
                Sink::Rate(rate) => {
                    assert!(rate.total() >= rate.trues());
                    assert!(rate.trues() >= 0);
                }
                other => panic!("unexpected sink {other:?}"),
            }
        }
        thread::sleep(Duration::from_millis(1));
    }

    for producer in producers {
        producer.join().unwrap();
    }
    ingester.stop().unwrap();

    let observed = engine.observed_metric_by_id("http_req_duration").unwrap();
    match observed.sink {
        Sink::Trend(trend) => assert_eq!(trend.count(), 800),
        other => panic!("expected a trend sink, got {other:?}"),
    }
}
