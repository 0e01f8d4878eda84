#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use serial_test::serial;
use tempfile::TempDir;
use tikzrender::{
    application::render::{RenderError, Stage},
    domain::{
        error::ValidationError,
        key::ArtifactKey,
        types::{CacheStatus, OutputFormat},
        validation::DEFAULT_MAX_SOURCE_BYTES,
    },
};

use common::{Convert, FAKE_PNG, FAKE_SVG, FakeToolchain, Latex, leftover_files};

const CIRCLE: &str = "\\begin{tikzpicture}\\draw (0,0) circle (1);\\end{tikzpicture}";

#[tokio::test]
#[serial]
async fn svg_miss_then_hit_runs_tools_once() {
    let tools = FakeToolchain::new(Latex::Ok, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 2, true);

    let first = service
        .render(Some(CIRCLE), OutputFormat::Svg)
        .await
        .expect("first render");
    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(first.bytes, Bytes::from_static(FAKE_SVG.as_bytes()));
    assert_eq!(tools.calls(), vec!["pdflatex", "pdf2svg"]);
    assert_eq!(service.cache().len(), 1);

    let second = service
        .render(Some(CIRCLE), OutputFormat::Svg)
        .await
        .expect("second render");
    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(second.bytes, first.bytes);
    assert_eq!(tools.calls().len(), 2, "cache hit must not spawn tools");

    let stats = service.cache().stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
    assert!(leftover_files(temp.path()).is_empty());
}

#[tokio::test]
#[serial]
async fn png_render_uses_pdftoppm() {
    let tools = FakeToolchain::new(Latex::Ok, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 1, true);

    let outcome = service
        .render(Some(CIRCLE), OutputFormat::Png)
        .await
        .expect("png render");
    assert_eq!(outcome.bytes, Bytes::from_static(FAKE_PNG));
    assert_eq!(tools.calls(), vec!["pdflatex", "pdftoppm"]);
}

#[tokio::test]
#[serial]
async fn formats_are_cached_separately() {
    let tools = FakeToolchain::new(Latex::Ok, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 2, true);

    service
        .render(Some(CIRCLE), OutputFormat::Svg)
        .await
        .expect("svg");
    let png = service
        .render(Some(CIRCLE), OutputFormat::Png)
        .await
        .expect("png");
    assert_eq!(png.cache, CacheStatus::Miss);
    assert_ne!(png.key, ArtifactKey::for_render(CIRCLE, OutputFormat::Svg));
    assert_eq!(service.cache().len(), 2);
}

#[tokio::test]
#[serial]
async fn compile_failure_surfaces_output_and_cleans_up() {
    let tools = FakeToolchain::new(Latex::Fails, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 2, true);

    let err = service
        .render(Some(CIRCLE), OutputFormat::Svg)
        .await
        .expect_err("compile fails");
    match &err {
        RenderError::ProcessFailure {
            stage,
            exit_code,
            output,
        } => {
            assert_eq!(*stage, Stage::Compile);
            assert_eq!(*exit_code, Some(1));
            assert!(output.contains("Undefined control sequence"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(tools.calls(), vec!["pdflatex"]);
    assert!(leftover_files(temp.path()).is_empty());
    assert!(service.cache().is_empty());
}

#[tokio::test]
#[serial]
async fn missing_pdf_is_a_compile_failure() {
    let tools = FakeToolchain::new(Latex::NoPdf, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 2, true);

    let err = service
        .render(Some(CIRCLE), OutputFormat::Svg)
        .await
        .expect_err("no pdf");
    assert!(matches!(
        err,
        RenderError::MissingOutput {
            stage: Stage::Compile,
            ..
        }
    ));
    assert_eq!(err.code(), "compile_failed");
    assert!(leftover_files(temp.path()).is_empty());
}

#[tokio::test]
#[serial]
async fn conversion_failure_cleans_every_artifact() {
    let tools = FakeToolchain::new(Latex::Ok, Convert::Fails);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 2, true);

    for format in OutputFormat::ALL {
        let err = service
            .render(Some(CIRCLE), format)
            .await
            .expect_err("convert fails");
        assert!(matches!(
            err,
            RenderError::ProcessFailure {
                stage: Stage::Convert,
                ..
            }
        ));
        assert!(
            leftover_files(temp.path()).is_empty(),
            "artifacts left after {format} failure: {:?}",
            leftover_files(temp.path())
        );
    }
}

#[tokio::test]
#[serial]
async fn hung_compiler_is_killed_at_the_deadline() {
    let tools = FakeToolchain::new(Latex::Hangs, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let timeout = Duration::from_millis(300);
    let service = tools.service_with_timeout(temp.path(), 1, true, timeout);

    let started = Instant::now();
    let err = service
        .render(Some(CIRCLE), OutputFormat::Svg)
        .await
        .expect_err("times out");
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        RenderError::Timeout {
            stage: Stage::Compile,
            ..
        }
    ));
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(3), "took {elapsed:?}");
    assert!(leftover_files(temp.path()).is_empty());
    assert_eq!(service.queue_stats().running, 0);
}

#[tokio::test]
#[serial]
async fn rejected_sources_never_reach_the_queue() {
    let tools = FakeToolchain::new(Latex::Ok, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 1, true);

    let unsafe_source = "\\input{/etc/passwd}";
    let err = service
        .render(Some(unsafe_source), OutputFormat::Svg)
        .await
        .expect_err("unsafe");
    assert!(matches!(
        err,
        RenderError::Validation(ValidationError::UnsafeContent { .. })
    ));

    let at_limit = "x".repeat(DEFAULT_MAX_SOURCE_BYTES);
    service
        .render(Some(&at_limit), OutputFormat::Svg)
        .await
        .expect("exactly max bytes is accepted");

    let over_limit = "x".repeat(DEFAULT_MAX_SOURCE_BYTES + 1);
    let err = service
        .render(Some(&over_limit), OutputFormat::Svg)
        .await
        .expect_err("too large");
    assert!(matches!(
        err,
        RenderError::Validation(ValidationError::TooLarge { .. })
    ));

    let err = service
        .render(None, OutputFormat::Svg)
        .await
        .expect_err("missing");
    assert_eq!(err.code(), "invalid_input");

    assert_eq!(tools.calls(), vec!["pdflatex", "pdf2svg"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn burst_never_exceeds_concurrency() {
    let tools = FakeToolchain::new(Latex::Delayed, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 2, true);

    let sampler = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut max_running = 0;
            for _ in 0..200 {
                max_running = max_running.max(service.queue_stats().running);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            max_running
        })
    };

    let renders = (0..6).map(|i| {
        let service = service.clone();
        async move {
            let source = format!("\\draw (0,0) -- ({i},1);");
            service.render(Some(&source), OutputFormat::Svg).await
        }
    });
    let results = futures::future::join_all(renders).await;

    assert!(results.iter().all(Result::is_ok));
    let max_running = sampler.await.expect("sampler");
    assert!(max_running <= 2, "running peaked at {max_running}");
    assert!(max_running >= 1);
    assert_eq!(tools.calls().len(), 12);
    let stats = service.queue_stats();
    assert_eq!((stats.queued, stats.running), (0, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn identical_concurrent_misses_share_one_pipeline() {
    let tools = FakeToolchain::new(Latex::Delayed, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 2, true);

    let (a, b, c) = tokio::join!(
        service.render(Some(CIRCLE), OutputFormat::Svg),
        service.render(Some(CIRCLE), OutputFormat::Svg),
        service.render(Some(CIRCLE), OutputFormat::Svg),
    );
    let a = a.expect("a");
    assert_eq!(b.expect("b").bytes, a.bytes);
    assert_eq!(c.expect("c").bytes, a.bytes);
    assert_eq!(tools.calls(), vec!["pdflatex", "pdf2svg"]);
    assert!(service.in_flight().expect("coalescing on").is_empty());
}

#[tokio::test]
#[serial]
async fn abandoned_request_still_fills_the_cache() {
    let tools = FakeToolchain::new(Latex::Delayed, Convert::Ok);
    let temp = TempDir::new().expect("temp dir");
    let service = tools.service(temp.path(), 1, false);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        service.render(Some(CIRCLE), OutputFormat::Svg),
    )
    .await;
    assert!(abandoned.is_err(), "request should still be running");

    let deadline = Instant::now() + Duration::from_secs(5);
    while service.cache().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let outcome = service
        .render(Some(CIRCLE), OutputFormat::Svg)
        .await
        .expect("render");
    assert_eq!(outcome.cache, CacheStatus::Hit);
    assert_eq!(tools.calls(), vec!["pdflatex", "pdf2svg"]);
}
