//! Demo wiring for spindle: a scheduler plus a cache layer over the
//! in-memory backend. Submits work at three priorities, waits for the
//! results, caches them read-through, and dumps a metrics snapshot.

use std::sync::Arc;
use std::time::Duration;

use spindle_core::cache::manager::{spawn_health_probe, CacheManager};
use spindle_core::{
    CacheConfig, CacheLayer, CachePolicy, CacheStrategy, MemoryBackend, MetricsSnapshot, Priority,
    Scheduler, SchedulerConfig, TaskId,
};

fn sleepy_work(label: &'static str, ms: u64) -> spindle_core::task::WorkUnit {
    Box::new(move || {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(serde_json::json!({ "label": label, "slept_ms": ms }))
        })
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // (A) Cache: in-memory backend behind the pooled manager, with a
    // category policy for task results.
    let manager = Arc::new(CacheManager::new(
        Arc::new(MemoryBackend::new()),
        CacheConfig::default(),
    ));
    let probe = spawn_health_probe(Arc::clone(&manager));
    let cache = CacheLayer::new(Arc::clone(&manager)).with_policy(
        "task-result",
        CachePolicy::new(Duration::from_secs(60), CacheStrategy::WriteThrough),
    );

    // (B) Scheduler with two workers.
    let scheduler = Scheduler::start(SchedulerConfig {
        worker_count: 2,
        ..SchedulerConfig::default()
    });

    // (C) Submit mixed-priority work.
    let jobs = [
        ("critical-job", Priority::Critical, 50),
        ("normal-job", Priority::Normal, 50),
        ("low-job", Priority::Low, 50),
    ];
    for (label, priority, ms) in jobs {
        let accepted = scheduler
            .submit(TaskId::new(label), priority, sleepy_work(label, ms))
            .await
            .expect("fresh ids");
        println!("submitted {label} ({priority}): accepted={accepted}");
    }

    // (D) Wait for each result and cache it read-through.
    for (label, _, _) in jobs {
        let id = TaskId::new(label);
        match scheduler.get_result(&id, Duration::from_secs(5)).await {
            Ok(value) => {
                let cached: Result<serde_json::Value, String> = cache
                    .get_or_compute("task-result", &[label], || async move { Ok(value) })
                    .await;
                println!("{label} -> {}", cached.expect("compute is infallible"));
            }
            Err(e) => println!("{label} -> error: {e}"),
        }
    }

    // A second read hits the cache.
    let warm: Option<serde_json::Value> = cache.get("task-result", &["critical-job"]).await;
    println!("warm read: {}", warm.map(|v| v.to_string()).unwrap_or_default());

    // (E) Snapshot, then graceful shutdown.
    let snapshot = MetricsSnapshot::collect(&scheduler, Some(&manager));
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).expect("snapshot serializes")
    );

    probe.shutdown_and_join().await;
    scheduler.shutdown_and_join().await;
}
