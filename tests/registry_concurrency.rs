//! Selection fairness under concurrent callers.

use std::collections::HashMap;
use std::sync::Arc;

use dispatch_proxy::config::BackendConfig;
use dispatch_proxy::health::HealthPolicy;
use dispatch_proxy::load_balancer::{BackendRegistry, RoundRobin, WeightedRoundRobin};

fn registry(backends: &[(&str, u32)]) -> Arc<BackendRegistry> {
    let configs: Vec<BackendConfig> = backends
        .iter()
        .map(|(url, weight)| BackendConfig {
            weight: *weight,
            ..BackendConfig::new(*url)
        })
        .collect();
    Arc::new(BackendRegistry::from_config(&configs, HealthPolicy::default()).unwrap())
}

async fn select_concurrently(
    registry: Arc<BackendRegistry>,
    weighted: bool,
    selections: usize,
) -> HashMap<String, usize> {
    let mut tasks = Vec::with_capacity(selections);
    for _ in 0..selections {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let backend = if weighted {
                registry.select(&WeightedRoundRobin::new(), &[])
            } else {
                registry.select(&RoundRobin::new(), &[])
            };
            backend.unwrap().id.to_string()
        }));
    }

    let mut counts = HashMap::new();
    for task in tasks {
        *counts.entry(task.await.unwrap()).or_insert(0) += 1;
    }
    counts
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_round_robin_is_gap_free() {
    let registry = registry(&[
        ("http://127.0.0.1:7401", 1),
        ("http://127.0.0.1:7402", 1),
        ("http://127.0.0.1:7403", 1),
    ]);

    let counts = select_concurrently(registry, false, 1000).await;

    assert_eq!(counts.len(), 3);
    assert_eq!(counts.values().sum::<usize>(), 1000);
    for (backend, count) in &counts {
        assert!(
            *count == 333 || *count == 334,
            "{} chosen {} times",
            backend,
            count
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_weighted_selection_matches_weights() {
    let registry = registry(&[
        ("http://127.0.0.1:7411", 1),
        ("http://127.0.0.1:7412", 2),
        ("http://127.0.0.1:7413", 3),
    ]);

    let counts = select_concurrently(registry, true, 600).await;

    assert_eq!(counts["http://127.0.0.1:7411"], 100);
    assert_eq!(counts["http://127.0.0.1:7412"], 200);
    assert_eq!(counts["http://127.0.0.1:7413"], 300);
}

#[test]
fn concurrent_selection_from_os_threads() {
    let registry = registry(&[("http://127.0.0.1:7421", 1), ("http://127.0.0.1:7422", 1)]);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let policy = RoundRobin::new();
                (0..250)
                    .map(|_| registry.select(&policy, &[]).unwrap().id.to_string())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    assert_eq!(counts["http://127.0.0.1:7421"], 500);
    assert_eq!(counts["http://127.0.0.1:7422"], 500);
}
