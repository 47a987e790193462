//! Area prefetch integration tests.
//!
//! Tests verify:
//! - Work list size and `cached + failed == total`
//! - Progress events, including exactly one at 100%
//! - Error events for unusable styles and descriptors
//! - Cancellation and the one-job-per-area rule

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use offline_map_proxy::cache::{MemoryTierStore, RequestIdentity, TierStore};
use offline_map_proxy::config::CacheConfig;
use offline_map_proxy::error::PrefetchError;
use offline_map_proxy::prefetch::{
    AreaPrefetchJob, EventBus, PrefetchCommand, PrefetchEvent, PrefetchManager,
};
use offline_map_proxy::tile::BoundingBox;

use super::test_utils::MockFetcher;

const STYLE_URL: &str = "https://styles.example.com/basic/style.json";

fn descriptor() -> serde_json::Value {
    json!({
        "version": 8,
        "sources": {
            "base": {
                "type": "raster",
                "tiles": ["https://tiles.example.com/{z}/{x}/{y}.png"]
            }
        },
        "layers": []
    })
}

fn tile_url(x: u32, y: u32) -> String {
    format!("https://tiles.example.com/1/{}/{}.png", x, y)
}

/// The whole world at zoom 1: a 2x2 tile area.
fn world_command(area_name: &str) -> PrefetchCommand {
    PrefetchCommand {
        area_name: area_name.to_string(),
        bbox: BoundingBox::new(-180.0, -85.0, 180.0, 85.0),
        min_zoom: 1,
        max_zoom: 1,
        style_url: STYLE_URL.to_string(),
        access_token: None,
    }
}

fn job(
    fetcher: MockFetcher,
    config: CacheConfig,
) -> (
    AreaPrefetchJob<MemoryTierStore, MockFetcher>,
    Arc<MemoryTierStore>,
    Arc<MockFetcher>,
) {
    let store = Arc::new(MemoryTierStore::new());
    let fetcher = Arc::new(fetcher);
    let job = AreaPrefetchJob::new(
        store.clone(),
        fetcher.clone(),
        Arc::new(config),
        EventBus::default(),
    );
    (job, store, fetcher)
}

fn drain(receiver: &mut broadcast::Receiver<PrefetchEvent>) -> Vec<PrefetchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_two_by_two_area_counts_and_progress() {
    let mut fetcher = MockFetcher::new().with_json(STYLE_URL, descriptor());
    for (x, y) in [(0, 0), (1, 0), (0, 1)] {
        fetcher = fetcher.with_response(&tile_url(x, y), 200, vec![x as u8, y as u8]);
    }
    fetcher = fetcher.with_failure(&tile_url(1, 1));

    let (job, store, fetcher) = job(fetcher, CacheConfig::default());
    let mut events = job.events().subscribe();

    let summary = job
        .run(&world_command("world"), CancellationToken::new())
        .await
        .unwrap();

    // 4 tiles plus the descriptor
    assert_eq!(summary.total, 5);
    assert_eq!(summary.cached, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.cached + summary.failed, summary.total);
    assert!(!summary.cancelled);

    let events = drain(&mut events);
    let complete_progress = events
        .iter()
        .filter(|e| matches!(e, PrefetchEvent::Progress { percent: 100, .. }))
        .count();
    assert_eq!(complete_progress, 1);
    assert!(matches!(
        events.last(),
        Some(PrefetchEvent::Complete {
            cached: 4,
            failed: 1,
            total: 5,
            cancelled: false,
            ..
        })
    ));

    let config = CacheConfig::default();
    assert_eq!(store.len(&config.tiers.tile_data).await.unwrap(), 3);
    assert!(store
        .get(&config.tiers.map_api_metadata, &RequestIdentity::get(STYLE_URL))
        .await
        .unwrap()
        .is_some());

    // Downloads bypass HTTP caches and carry no credentials
    let options = fetcher.options_for(&tile_url(0, 0)).unwrap();
    assert!(options.bypass_cache);
    assert!(options.omit_credentials);
}

#[tokio::test]
async fn test_progress_every_twenty_five_downloads() {
    // Zoom 3 world: 64 tiles plus the descriptor
    let fetcher = MockFetcher::new().with_json(STYLE_URL, descriptor());
    let (job, _store, _fetcher) = job(fetcher, CacheConfig::default());
    let mut events = job.events().subscribe();

    let mut command = world_command("world");
    command.min_zoom = 3;
    command.max_zoom = 3;
    let summary = job.run(&command, CancellationToken::new()).await.unwrap();
    assert_eq!(summary.total, 65);

    let mut completed: Vec<usize> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            PrefetchEvent::Progress { completed, .. } => Some(completed),
            _ => None,
        })
        .collect();
    completed.sort_unstable();
    assert_eq!(completed, vec![25, 50, 65]);
}

#[tokio::test]
async fn test_provider_style_gets_token_on_every_url() {
    let descriptor_url = "https://api.mapbox.com/styles/v1/acme/basic?access_token=T";
    let provider_descriptor = json!({
        "sources": {
            "composite": {"type": "vector", "url": "mapbox://acme.streets"}
        },
        "sprite": "mapbox://sprites/acme/basic"
    });
    let fetcher = MockFetcher::new().with_json(descriptor_url, provider_descriptor);
    let (job, _store, fetcher) = job(fetcher, CacheConfig::default());

    let command = PrefetchCommand {
        style_url: "mapbox://styles/acme/basic".to_string(),
        access_token: Some("T".to_string()),
        min_zoom: 0,
        max_zoom: 0,
        ..world_command("world")
    };
    let summary = job.run(&command, CancellationToken::new()).await.unwrap();

    // 1 tile, the descriptor and four sprite resources
    assert_eq!(summary.total, 6);
    let urls = fetcher.requested_urls();
    assert!(urls.iter().all(|url| url.contains("access_token=T")));
    assert!(urls
        .iter()
        .any(|url| url.starts_with("https://api.mapbox.com/v4/acme.streets/0/0/0.vector.pbf")));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_unsupported_style_emits_error_event() {
    let (job, _store, fetcher) = job(MockFetcher::new(), CacheConfig::default());
    let mut events = job.events().subscribe();

    let command = PrefetchCommand {
        style_url: "ftp://styles/acme".to_string(),
        ..world_command("world")
    };
    let result = job.run(&command, CancellationToken::new()).await;

    assert!(matches!(result, Err(PrefetchError::Style(_))));
    assert_eq!(fetcher.request_count(), 0);
    assert!(matches!(
        drain(&mut events).as_slice(),
        [PrefetchEvent::Error { area_name, .. }] if area_name == "world"
    ));
}

#[tokio::test]
async fn test_descriptor_http_error_aborts() {
    let fetcher = MockFetcher::new().with_response(STYLE_URL, 401, b"unauthorized".to_vec());
    let (job, store, fetcher) = job(fetcher, CacheConfig::default());

    let result = job.run(&world_command("world"), CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(PrefetchError::DescriptorStatus { status: 401 })
    ));
    assert_eq!(fetcher.request_count(), 1);
    assert!(store.tier_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_descriptor_not_json_aborts() {
    let fetcher = MockFetcher::new().with_response(STYLE_URL, 200, b"<html>".to_vec());
    let (job, _store, _fetcher) = job(fetcher, CacheConfig::default());

    let result = job.run(&world_command("world"), CancellationToken::new()).await;
    assert!(matches!(result, Err(PrefetchError::DescriptorParse(_))));
}

#[tokio::test]
async fn test_invalid_zoom_range_rejected() {
    let (job, _store, fetcher) = job(MockFetcher::new(), CacheConfig::default());

    let command = PrefetchCommand {
        min_zoom: 5,
        max_zoom: 2,
        ..world_command("world")
    };
    let result = job.run(&command, CancellationToken::new()).await;

    assert!(matches!(result, Err(PrefetchError::InvalidArea { .. })));
    assert_eq!(fetcher.request_count(), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelled_before_download_fetches_only_descriptor() {
    let fetcher = MockFetcher::new().with_json(STYLE_URL, descriptor());
    let (job, _store, fetcher) = job(fetcher, CacheConfig::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = job.run(&world_command("world"), cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.cached + summary.failed, 0);
    assert_eq!(summary.total, 5);
    assert_eq!(fetcher.request_count(), 1);
}

#[tokio::test]
async fn test_manager_cancel_stops_running_job() {
    let fetcher = MockFetcher::new()
        .with_json(STYLE_URL, descriptor())
        .with_delay(Duration::from_millis(20));
    let config = CacheConfig::default().with_prefetch_concurrency(1);
    let (job, _store, _fetcher) = job(fetcher, config);
    let manager = PrefetchManager::new(job);

    let mut command = world_command("world");
    command.max_zoom = 4;
    let handle = manager.start(command).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.cancel("world"));

    let summary = handle.await.unwrap().unwrap();
    assert!(summary.cancelled);
    assert!(summary.cached + summary.failed < summary.total);
    assert!(manager.running_areas().is_empty());
    assert!(!manager.cancel("world"));
}

#[tokio::test]
async fn test_manager_rejects_duplicate_area() {
    let fetcher = MockFetcher::new()
        .with_json(STYLE_URL, descriptor())
        .with_delay(Duration::from_millis(10));
    let (job, _store, _fetcher) = job(fetcher, CacheConfig::default());
    let manager = PrefetchManager::new(job);

    let first = manager.start(world_command("world")).unwrap();
    let second = manager.start(world_command("world"));
    assert!(matches!(
        second,
        Err(PrefetchError::AlreadyRunning { area_name }) if area_name == "world"
    ));

    // A different area may run alongside
    let other = manager.start(world_command("elsewhere")).unwrap();
    assert_eq!(manager.running_areas(), vec!["elsewhere", "world"]);

    first.await.unwrap().unwrap();
    other.await.unwrap().unwrap();
    assert!(manager.running_areas().is_empty());

    // Finished areas can be prefetched again
    let again = manager.start(world_command("world")).unwrap();
    assert!(again.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_panicked_job_releases_area() {
    let fetcher = MockFetcher::new().with_panic(STYLE_URL);
    let (job, _store, _fetcher) = job(fetcher, CacheConfig::default());
    let manager = PrefetchManager::new(job);

    let handle = manager.start(world_command("world")).unwrap();
    assert!(handle.await.unwrap_err().is_panic());
    assert!(manager.running_areas().is_empty());

    // The area is free for a new job
    let again = manager.start(world_command("world"));
    assert!(again.is_ok());
}
