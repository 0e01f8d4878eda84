#![cfg(unix)]

mod common;

use std::collections::HashSet;
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;
use tikzrender::cache::{CacheConfig, ResultCache};
use tikzrender::domain::{key::ArtifactKey, types::OutputFormat};

use common::{Convert, FakeToolchain, Latex};

#[tokio::test]
async fn render_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Miss, pipeline run, then hit
    let tools = FakeToolchain::new(Latex::Ok, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 1, true);
    service
        .render(Some("\\draw (0,0) circle (1);"), OutputFormat::Svg)
        .await
        .expect("miss");
    service
        .render(Some("\\draw (0,0) circle (1);"), OutputFormat::Svg)
        .await
        .expect("hit");

    // Killed compiler
    let hung = FakeToolchain::new(Latex::Hangs, Convert::Ok);
    let hung_temp = TempDir::new().expect("temp dir");
    let hung_service =
        hung.service_with_timeout(hung_temp.path(), 1, true, Duration::from_millis(200));
    hung_service
        .render(Some("\\draw (0,0) -- (1,0);"), OutputFormat::Svg)
        .await
        .expect_err("timeout");

    // Capacity eviction and lazy expiry
    let small = ResultCache::new(CacheConfig {
        ttl: Duration::from_millis(10),
        sweep_interval: Duration::from_secs(60),
        capacity: 1,
    });
    let first = ArtifactKey::for_render("a", OutputFormat::Svg);
    let second = ArtifactKey::for_render("b", OutputFormat::Svg);
    small.set(&first, "a".into());
    small.set(&second, "b".into());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(small.get(&second).is_none());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tikzrender_cache_hit_total",
        "tikzrender_cache_miss_total",
        "tikzrender_cache_evict_total",
        "tikzrender_cache_expired_total",
        "tikzrender_process_timeout_total",
        "tikzrender_queue_queued",
        "tikzrender_queue_running",
        "tikzrender_queue_wait_ms",
        "tikzrender_pipeline_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
