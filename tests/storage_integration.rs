//! Integration tests for the storage collaborators
//!
//! Covers the last-update repository (lookup, sentinel, expiry, background
//! batches, concurrent writers) and raw sample reads through the engine,
//! including the default read window.

use std::sync::Arc;

use tsdb_aggregate::config::StorageConfig;
use tsdb_aggregate::query::QueryEngine;
use tsdb_aggregate::storage::{
    spawn_insert, LastUpdate, LastUpdateRepository, MemoryLastUpdateRepository,
    MemorySampleRepository, SampleRepository,
};
use tsdb_aggregate::types::{Duration, Resource, Sample, Timestamp, ValueType};

fn update(id: &str, secs: i64) -> LastUpdate {
    LastUpdate::new(Resource::new(id), Timestamp::from_secs(secs))
}

// ============================================================================
// Last update
// ============================================================================

#[tokio::test]
async fn test_last_update_lookup_and_sentinel() {
    let repo = MemoryLastUpdateRepository::from_config(&StorageConfig::default()).unwrap();
    repo.insert(vec![update("R", 100)]).await.unwrap();

    assert_eq!(
        repo.select_last_update(&Resource::new("R")).await.unwrap(),
        Timestamp::from_secs(100)
    );
    assert_eq!(
        repo.select_last_update(&Resource::new("unknown")).await.unwrap(),
        Timestamp::EPOCH
    );
}

#[tokio::test]
async fn test_spawned_batch_is_visible_after_join() {
    let repo: Arc<dyn LastUpdateRepository> =
        Arc::new(MemoryLastUpdateRepository::new(Duration::from_hours(1)).unwrap());

    let handle = spawn_insert(
        Arc::clone(&repo),
        vec![update("router1", 10), update("router2", 20)],
    );
    handle.await.unwrap().unwrap();

    assert_eq!(
        repo.select_last_update(&Resource::new("router2")).await.unwrap(),
        Timestamp::from_secs(20)
    );
}

#[tokio::test]
async fn test_concurrent_writers_keep_newest() {
    let repo: Arc<dyn LastUpdateRepository> =
        Arc::new(MemoryLastUpdateRepository::new(Duration::ZERO).unwrap());

    let handles: Vec<_> = (1..=50)
        .map(|i| spawn_insert(Arc::clone(&repo), vec![update("shared", i)]))
        .collect();
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    assert_eq!(
        repo.select_last_update(&Resource::new("shared")).await.unwrap(),
        Timestamp::from_secs(50)
    );
}

#[tokio::test]
async fn test_expired_marker_reads_as_epoch() {
    let repo = MemoryLastUpdateRepository::new(Duration::from_millis(10)).unwrap();
    repo.insert(vec![update("R", 100)]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(40)).await;

    assert_eq!(
        repo.select_last_update(&Resource::new("R")).await.unwrap(),
        Timestamp::EPOCH
    );
}

#[test]
fn test_negative_ttl_is_a_configuration_error() {
    let config = StorageConfig {
        last_update_ttl: Duration::from_secs(-60),
        ..StorageConfig::default()
    };
    assert!(MemoryLastUpdateRepository::from_config(&config).is_err());
}

// ============================================================================
// Raw sample reads
// ============================================================================

#[tokio::test]
async fn test_select_samples_merges_partitions() {
    let repo = Arc::new(MemorySampleRepository::new(Duration::from_mins(1)).unwrap());
    let eth0 = Resource::new("router1:eth0");
    let samples: Vec<Sample> = (0..10)
        .flat_map(|i| {
            let ts = Timestamp::from_secs(i * 45);
            [
                Sample::new(ts, eth0.clone(), "ifInOctets", ValueType::Counter(i as u64)),
                Sample::new(ts, eth0.clone(), "ifOutOctets", ValueType::Counter(2 * i as u64)),
            ]
        })
        .collect();
    repo.insert(samples).await.unwrap();
    assert!(repo.partition_count() > 1);

    let engine = QueryEngine::new(repo);
    let rows = engine
        .select_samples(
            &eth0,
            Some(Timestamp::from_secs(0)),
            Some(Timestamp::from_secs(1000)),
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 10);
    assert!(rows
        .rows()
        .windows(2)
        .all(|w| w[0].timestamp() < w[1].timestamp()));
    assert!(rows.iter().all(|row| row.len() == 2));
}

async fn engine_around_now() -> (QueryEngine, Resource, Timestamp) {
    let repo = Arc::new(MemorySampleRepository::new(Duration::from_hours(6)).unwrap());
    let router = Resource::new("router1:eth1");
    let now = Timestamp::now();
    let samples: Vec<Sample> = [
        (Duration::from_hours(48), 1.0),
        (Duration::from_hours(23), 2.0),
        (Duration::from_mins(5), 3.0),
    ]
    .into_iter()
    .map(|(age, value)| Sample::new(now - age, router.clone(), "load", ValueType::Gauge(value)))
    .collect();
    repo.insert(samples).await.unwrap();
    (QueryEngine::new(repo), router, now)
}

fn loads(rows: &tsdb_aggregate::ResultSet<Sample>) -> Vec<f64> {
    rows.iter()
        .filter_map(|row| row.values().get("load").copied().flatten())
        .collect()
}

#[tokio::test]
async fn test_select_samples_defaults_to_last_day() {
    let (engine, router, _) = engine_around_now().await;
    let rows = engine.select_samples(&router, None, None).await.unwrap();
    assert_eq!(loads(&rows), vec![2.0, 3.0]);
}

#[tokio::test]
async fn test_select_samples_open_end_reads_until_now() {
    let (engine, router, now) = engine_around_now().await;

    let rows = engine
        .select_samples(&router, Some(now - Duration::from_days(3)), None)
        .await
        .unwrap();
    assert_eq!(loads(&rows), vec![1.0, 2.0, 3.0]);

    let rows = engine
        .select_samples(&router, Some(now - Duration::from_hours(1)), None)
        .await
        .unwrap();
    assert_eq!(loads(&rows), vec![3.0]);
}
