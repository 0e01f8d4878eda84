use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc};

use tikzrender::{
    application::{
        describe::{AnthropicDescriber, DescribeService, DescriptionProvider},
        error::AppError,
        render::RenderService,
    },
    cache::{CacheConfig, ResultCache},
    config,
    infra::{
        error::InfraError,
        http::{self, ApiRateLimiter, ApiState},
        telemetry,
    },
};
use tokio::{io::AsyncWriteExt, sync::watch, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

/// Build the render service and make sure its scratch directory exists
/// before any pipeline can run.
async fn init_render(
    settings: &config::Settings,
    cache: Arc<ResultCache>,
) -> Result<RenderService, AppError> {
    let render = RenderService::from_settings(&settings.render, cache).map_err(|err| {
        AppError::from(config::LoadError::Invalid {
            key: "render.deny_patterns",
            reason: err.to_string(),
        })
    })?;

    render
        .workspace()
        .ensure()
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    Ok(render)
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = Arc::new(ResultCache::new(CacheConfig::from(&settings.cache)));
    let render = init_render(&settings, Arc::clone(&cache)).await?;

    let provider = AnthropicDescriber::from_settings(&settings.describe)?
        .map(|describer| Arc::new(describer) as Arc<dyn DescriptionProvider>);
    let describe = DescribeService::new(provider, Arc::clone(&cache));
    if !describe.is_enabled() {
        warn!(
            target = "tikzrender::serve",
            "ANTHROPIC_API_KEY not set; /api/describe will answer 503"
        );
    }

    let rate_limiter = Arc::new(ApiRateLimiter::from_settings(&settings.rate_limit));
    let state = ApiState {
        render,
        describe,
        rate_limiter: Arc::clone(&rate_limiter),
    };

    let sweeper = cache.spawn_sweeper();
    let pruner = spawn_rate_limit_pruner(rate_limiter);

    let result = serve_http(&settings, state).await;

    for handle in [sweeper, pruner] {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let cache = Arc::new(ResultCache::new(CacheConfig::from(&settings.cache)));
    let render = init_render(&settings, cache).await?;

    let source = tokio::fs::read_to_string(&args.input)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let outcome = render.render(Some(&source), args.format).await?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, &outcome.bytes)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            info!(
                target = "tikzrender::render",
                input = %args.input.display(),
                output = %path.display(),
                format = outcome.format.as_str(),
                bytes = outcome.bytes.len(),
                "Wrote rendered diagram"
            );
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(&outcome.bytes)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            stdout
                .flush()
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
        }
    }

    Ok(())
}

fn spawn_rate_limit_pruner(limiter: Arc<ApiRateLimiter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window());
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            limiter.prune();
        }
    })
}

async fn serve_http(settings: &config::Settings, state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(state, &settings.http);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "tikzrender::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    })
    .into_future();
    tokio::pin!(server);

    let grace = settings.server.graceful_shutdown;
    let result = tokio::select! {
        result = &mut server => result,
        _ = shutdown_rx.wait_for(|stopping| *stopping) => {
            info!(
                target = "tikzrender::serve",
                grace_seconds = grace.as_secs(),
                "Shutting down, draining connections"
            );
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target = "tikzrender::serve",
                        "Graceful shutdown timed out; dropping open connections"
                    );
                    Ok(())
                }
            }
        }
    };

    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "tikzrender::serve", error = %err, "Ctrl-C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = "tikzrender::serve", error = %err, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
