use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use warp::hyper::service::make_service_fn;
use warp::hyper::Server;
use wdp_aggregator::{Aggregator, AggregatorOptions, Metrics};
use wdp_core::{Config, ServerConfig};
use wdp_weather::{build_providers, SharedProvider};

use crate::routes::routes;
use crate::state::AppState;

/// Main application state and lifecycle manager
pub struct App {
    config: RwLock<Arc<Config>>,
    aggregator: Arc<Aggregator>,
    state: AppState,
}

impl App {
    /// Build providers from `config` and wire up the aggregator
    pub fn new(config: Config) -> Result<Self> {
        let providers =
            build_providers(&config.weather).context("Failed to build weather providers")?;
        Ok(Self::with_providers(config, providers))
    }

    pub fn with_providers(config: Config, providers: Vec<SharedProvider>) -> Self {
        let aggregator = Arc::new(Aggregator::new(
            AggregatorOptions::from(&config.weather),
            providers,
            Arc::new(Metrics::new()),
        ));
        let state = AppState::new(Arc::clone(&aggregator), config.server.write_timeout_duration());

        if config.telemetry.enabled {
            tracing::info!(
                endpoint = %config.telemetry.endpoint,
                "Telemetry enabled; spans are recorded by the log subscriber"
            );
        }

        Self {
            config: RwLock::new(Arc::new(config)),
            aggregator,
            state,
        }
    }

    /// Start the aggregator workers, bound to `root`
    pub fn start(&self, root: CancellationToken) -> Result<()> {
        self.aggregator
            .start(root)
            .context("Failed to start aggregator")
    }

    /// Bind the HTTP listener and return its address plus the serving future.
    ///
    /// The future resolves once `shutdown` is cancelled and in-flight
    /// connections have finished.
    pub fn bind(
        &self,
        shutdown: CancellationToken,
    ) -> Result<(SocketAddr, impl Future<Output = Result<()>>)> {
        let server_config = self.config().server.clone();
        bind_server(&server_config, self.state.clone(), shutdown)
    }

    /// Stop the aggregator, waiting at most `deadline` for workers
    pub async fn shutdown(&self, deadline: Duration) {
        tracing::info!("Shutting down application");
        self.aggregator.stop(deadline).await;
    }

    /// Apply a new configuration without restarting the listener.
    ///
    /// Server settings are read once at bind time and are not reloaded.
    pub fn reload(&self, config: Config) -> Result<()> {
        let providers =
            build_providers(&config.weather).context("Failed to build weather providers")?;
        self.aggregator
            .reload(AggregatorOptions::from(&config.weather), providers);
        *self.config.write() = Arc::new(config);
        Ok(())
    }

    /// Get reference to application config
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read())
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }
}

fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .with_context(|| format!("Invalid listen address {addr}"))?
        .next()
        .with_context(|| format!("Listen address {addr} did not resolve"))
}

fn bind_server(
    config: &ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, impl Future<Output = Result<()>>)> {
    let addr = resolve_addr(&config.addr())?;
    let service = warp::service(routes(state));
    let make_service = make_service_fn(move |_conn| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(service) }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind {addr}"))?
        .http1_header_read_timeout(config.read_timeout_duration())
        .tcp_keepalive(Some(config.idle_timeout_duration()))
        .serve(make_service);
    let local_addr = server.local_addr();

    tracing::info!(
        addr = %local_addr,
        read_timeout_secs = config.read_timeout,
        write_timeout_secs = config.write_timeout,
        idle_timeout_secs = config.idle_timeout,
        "HTTP server listening"
    );

    let serving = async move {
        server
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server error")?;
        tracing::info!("HTTP server stopped");
        Ok(())
    };
    Ok((local_addr, serving))
}
