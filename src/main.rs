//! extproxy binary: CLI, config merge, startup and ordered shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use extproxy::backend::{BackendFetcher, ProxyType};
use extproxy::config::loader::{default_config_path, load_or_default};
use extproxy::config::validation::validate_config;
use extproxy::config::{ConfigError, ProxyConfig};
use extproxy::extension::{BuiltinLoader, DylibLoader, ExtensionRegistry, LoaderChain, SubRequester};
use extproxy::lifecycle::{signals, Shutdown};
use extproxy::observability::{logging, metrics};
use extproxy::{net, HttpServer, Pipeline};

#[derive(Debug, Parser)]
#[command(name = "extproxy", version, about = "Reverse proxy with loadable request/response extensions")]
struct Cli {
    /// Configuration file (JSON, or TOML when the name ends in .toml)
    #[arg(long = "config-path", short = 'c')]
    config_path: Option<PathBuf>,

    /// Comma-separated extension names; replaces the configured list
    #[arg(long, value_delimiter = ',')]
    extensions: Option<Vec<String>>,

    /// Backend protocol
    #[arg(long = "proxy-type", value_enum)]
    proxy_type: Option<ProxyType>,

    /// Port, address or Unix socket path to listen on
    #[arg(long)]
    listen: Option<String>,

    /// Backend address or URL
    #[arg(long)]
    backend: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(extensions) = &self.extensions {
            config.extensions.enabled = extensions
                .iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
        }
        if let Some(proxy_type) = self.proxy_type {
            config.proxy_type = proxy_type;
        }
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend = backend.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (mut config, fallback) = load_or_default(cli.config_path.as_deref())?;
    cli.apply(&mut config);

    logging::init(&config.observability.log_filter);
    tracing::info!("extproxy v{} starting", env!("CARGO_PKG_VERSION"));
    if let Some(reason) = fallback {
        tracing::warn!(
            path = %default_config_path().display(),
            error = %reason,
            "Config file not usable, using defaults"
        );
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    tracing::info!(
        proxy_type = %config.proxy_type,
        listen = %config.listen,
        backend = %config.backend,
        extensions = ?config.extensions.enabled,
        "Configuration loaded"
    );

    if let Some(address) = &config.observability.metrics_address {
        match address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // Extensions receive the sub-request handle before the pipeline exists.
    let sub_requests = SubRequester::new();
    let loader = LoaderChain::new(vec![
        Box::new(BuiltinLoader::with_defaults()),
        Box::new(DylibLoader::new()),
    ]);
    let registry = Arc::new(ExtensionRegistry::load(&loader, &config.extensions, &sub_requests).await?);
    if registry.is_empty() {
        tracing::info!("No extensions enabled");
    } else {
        tracing::info!(extensions = ?registry.names(), "Extension chain ready");
    }

    let pipeline = Arc::new(Pipeline::new(
        config.backend_descriptor(),
        Arc::new(BackendFetcher::new()),
        registry.clone(),
        &config.pipeline,
    ));
    sub_requests.bind(&pipeline);

    let listener = match net::bind(&config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            registry.unload().await;
            return Err(e.into());
        }
    };

    let shutdown = Shutdown::new();
    let stopped = shutdown.signalled();
    signals::spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(pipeline, &config.pipeline);
    let result = server.run(listener, stopped).await;

    registry.unload().await;
    tracing::info!("Shutdown complete");
    result.map_err(Into::into)
}
