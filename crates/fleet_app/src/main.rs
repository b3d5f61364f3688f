//! Scrape scheduler entry point.
mod effects;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fleet_engine::{
    DispatchSettings, HttpPageBoundResolver, MongoItemStore, NoBoundResolver, PageBoundResolver,
    ProxyHealthCheck, RedisStore, ReqwestDispatcher,
};
use fleet_logging::{fleet_error, fleet_info, fleet_warn};

use crate::effects::{drive, EffectRunner};
use crate::settings::Settings;

const PAGE_COUNT_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> ExitCode {
    let settings = Settings::parse();
    fleet_logging::initialize(settings.log_destination, settings.log_level);
    fleet_info!(
        "fleet_app {} starting ({:?} mode)",
        env!("CARGO_PKG_VERSION"),
        settings.execution_mode
    );

    let runner = match prepare(&settings).await {
        Ok(runner) => runner,
        Err(err) => {
            fleet_error!("[Startup] {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    let code = drive(&runner, shutdown_signal()).await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Connects both stores and, in production, verifies the outbound proxy.
async fn prepare(settings: &Settings) -> Result<EffectRunner> {
    if settings.is_production() {
        check_proxy(settings).await?;
    }

    let store = RedisStore::connect(settings.redis())
        .await
        .context("coordination store is unreachable")?;
    let items = MongoItemStore::connect(settings.mongo())
        .await
        .context("item store is unreachable")?;
    let dispatcher = ReqwestDispatcher::new(DispatchSettings::default())
        .context("failed to build the dispatch client")?;

    let resolver: Arc<dyn PageBoundResolver> = match settings.page_count_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Arc::new(
            HttpPageBoundResolver::new(url.trim(), PAGE_COUNT_TIMEOUT)
                .context("failed to build the page count client")?,
        ),
        _ => Arc::new(NoBoundResolver),
    };

    Ok(EffectRunner::new(
        Arc::new(store),
        Arc::new(items),
        Arc::new(dispatcher),
        resolver,
        settings.config_file.clone(),
        settings.scheduler(),
    ))
}

async fn check_proxy(settings: &Settings) -> Result<()> {
    let (Some(proxy), Some(probe)) = (
        settings.http_proxy.as_deref(),
        settings.proxy_probe_url.as_deref(),
    ) else {
        bail!("production mode needs HTTP_PROXY and PROXY_PROBE_URL");
    };
    ProxyHealthCheck::new(proxy.trim(), probe.trim())
        .check()
        .await
        .context("proxy health check failed")
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            fleet_warn!("cannot listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                fleet_warn!("cannot listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => fleet_info!("interrupt received"),
        _ = terminate => fleet_info!("termination requested"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production(extra: &[&str]) -> Settings {
        let mut args = vec!["fleet_app", "--execution-mode", "production"];
        args.extend_from_slice(extra);
        Settings::try_parse_from(args).unwrap()
    }

    #[tokio::test]
    async fn production_without_status_url_is_fatal() {
        let settings = production(&["--http-proxy", "http://127.0.0.1:1"]);
        if settings.proxy_probe_url.is_some() {
            // PROXY_PROBE_URL leaked in from the environment.
            return;
        }

        let err = check_proxy(&settings).await.unwrap_err();

        assert!(err.to_string().contains("PROXY_PROBE_URL"));
    }

    #[tokio::test]
    async fn production_with_dead_proxy_fails_before_touching_the_stores() {
        let settings = production(&[
            "--http-proxy",
            "http://127.0.0.1:1",
            "--proxy-probe-url",
            "http://probe.internal/proxyStatus",
            "--redis-url",
            "redis://127.0.0.1:1",
        ]);

        let err = match prepare(&settings).await {
            Ok(_) => panic!("startup succeeded through a dead proxy"),
            Err(err) => err,
        };

        assert_eq!(err.to_string(), "proxy health check failed");
    }
}
