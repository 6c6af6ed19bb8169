// # floatleased - Lease Holder Daemon
//
// Holds a floating-license seat for as long as it runs, so that a wrapped
// workload (or an operator) can rely on the seat being taken.
//
// This is a THIN integration layer: all lease logic lives in floatlease-core.
// - DO NOT add renewal or retry logic here (owned by the dispatcher)
// - Configuration is via environment variables ONLY
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Resolving the lease handle from the product data file
// 3. Saving the server location (when given) and requesting a lease
// 4. Logging client events until a signal arrives or the lease is lost
// 5. Dropping the lease on the way out
//
// ## Configuration
//
// - `FLOATLEASE_DATA_FILE`: Product data file (required)
// - `FLOATLEASE_PRODUCT_GUID`: Product GUID (required)
// - `FLOATLEASE_SERVER_HOST`: Lease server host (optional, saved before the request)
// - `FLOATLEASE_SERVER_PORT`: Lease server port (required with a host)
// - `FLOATLEASE_SCOPE`: `user` or `system` (default: user)
// - `FLOATLEASE_STORE_DIR`: Directory for server location records (optional)
// - `FLOATLEASE_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export FLOATLEASE_DATA_FILE=/opt/acme/product.json
// export FLOATLEASE_PRODUCT_GUID=2e1b6a2c-0000-4000-8000-000000000001
// export FLOATLEASE_SERVER_HOST=licenses.internal
// export FLOATLEASE_SERVER_PORT=13
//
// floatleased
// ```

use anyhow::{Context, Result};
use floatlease_core::traits::HandleResolver;
use floatlease_core::{
    ClientConfig, ClientEvent, DataFileResolver, FileLocationStore, Fingerprint, LeaseClient,
    LeaseEventKind, Scope,
};
use floatlease_http::HttpLeaseTransport;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound for releasing the lease on the way out
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
/// - 3: The lease expired and could not be renewed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FloatleaseExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
    /// The seat was lost
    LeaseLost = 3,
}

impl From<FloatleaseExitCode> for ExitCode {
    fn from(code: FloatleaseExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
struct Config {
    data_file: PathBuf,
    product_guid: String,
    server_host: Option<String>,
    server_port: Option<u16>,
    scope: Scope,
    store_dir: Option<PathBuf>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let server_port = match env::var("FLOATLEASE_SERVER_PORT") {
            Ok(port) => Some(port.trim().parse::<u16>().with_context(|| {
                format!("FLOATLEASE_SERVER_PORT '{}' is not a valid port", port)
            })?),
            Err(_) => None,
        };

        let scope = match env::var("FLOATLEASE_SCOPE") {
            Ok(scope) => scope
                .parse::<Scope>()
                .map_err(|e| anyhow::anyhow!("FLOATLEASE_SCOPE: {}", e))?,
            Err(_) => Scope::User,
        };

        Ok(Self {
            data_file: env::var("FLOATLEASE_DATA_FILE")
                .context("FLOATLEASE_DATA_FILE is required")?
                .into(),
            product_guid: env::var("FLOATLEASE_PRODUCT_GUID")
                .context("FLOATLEASE_PRODUCT_GUID is required")?,
            server_host: env::var("FLOATLEASE_SERVER_HOST")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
            server_port,
            scope,
            store_dir: env::var("FLOATLEASE_STORE_DIR").ok().map(PathBuf::from),
            log_level: env::var("FLOATLEASE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.data_file.as_os_str().is_empty() {
            anyhow::bail!("FLOATLEASE_DATA_FILE cannot be empty");
        }

        if !self.data_file.exists() {
            anyhow::bail!(
                "FLOATLEASE_DATA_FILE does not exist: {}",
                self.data_file.display()
            );
        }

        if self.product_guid.trim().is_empty() {
            anyhow::bail!("FLOATLEASE_PRODUCT_GUID cannot be empty");
        }

        match (&self.server_host, self.server_port) {
            (Some(_), None) => anyhow::bail!(
                "FLOATLEASE_SERVER_PORT is required when FLOATLEASE_SERVER_HOST is set"
            ),
            (None, Some(_)) => anyhow::bail!(
                "FLOATLEASE_SERVER_HOST is required when FLOATLEASE_SERVER_PORT is set"
            ),
            (_, Some(0)) => anyhow::bail!("FLOATLEASE_SERVER_PORT must be between 1 and 65535"),
            _ => {}
        }

        if let Some(dir) = &self.store_dir
            && dir.as_os_str().is_empty()
        {
            anyhow::bail!("FLOATLEASE_STORE_DIR cannot be empty when set");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "FLOATLEASE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// How the daemon ended
#[derive(Debug)]
enum Outcome {
    /// A shutdown signal arrived
    Signal(&'static str),
    /// The lease expired
    LeaseLost(LeaseEventKind),
    /// The event channel closed
    ClientGone,
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return FloatleaseExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return FloatleaseExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return FloatleaseExitCode::ConfigError.into();
    }

    info!("Starting floatleased for product {}", config.product_guid);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return FloatleaseExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run_daemon(config).await {
            Ok(Outcome::Signal(signal)) => {
                info!("Received {}, lease released", signal);
                FloatleaseExitCode::CleanShutdown
            }
            Ok(Outcome::LeaseLost(kind)) => {
                error!("Lease lost ({:?})", kind);
                FloatleaseExitCode::LeaseLost
            }
            Ok(Outcome::ClientGone) => {
                warn!("Client event channel closed");
                FloatleaseExitCode::RuntimeError
            }
            Err(e) => {
                error!("Daemon error: {:#}", e);
                exit_code_for(&e)
            }
        }
    });

    code.into()
}

/// Startup failures that stem from the environment rather than the run
fn exit_code_for(err: &anyhow::Error) -> FloatleaseExitCode {
    use floatlease_core::Error;

    match err.downcast_ref::<Error>() {
        Some(
            Error::DataFile(_)
            | Error::Config(_)
            | Error::InvalidFlags(_)
            | Error::EnableNetworkAdapters
            | Error::NoServer
            | Error::Permission,
        ) => FloatleaseExitCode::ConfigError,
        _ => FloatleaseExitCode::RuntimeError,
    }
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<Outcome> {
    let resolver = DataFileResolver::from_path(&config.data_file)?;
    let fingerprint = Fingerprint::generate()?;
    let handle = resolver.resolve(&config.product_guid, &fingerprint)?;
    info!(
        "Resolved handle {} (fingerprint {}…)",
        handle.id(),
        fingerprint.short()
    );

    let store = match &config.store_dir {
        Some(dir) => FileLocationStore::new(dir.join("user"), dir.join("system")),
        None => FileLocationStore::for_product(&config.product_guid)?,
    };

    let client_config = ClientConfig::new().with_scope(config.scope);
    let transport = HttpLeaseTransport::from_config(&client_config)?;
    let (client, events) =
        LeaseClient::new(client_config, handle, Box::new(transport), Box::new(store))?;

    if let (Some(host), Some(port)) = (&config.server_host, config.server_port) {
        client.save_server(host, port, config.scope).await?;
        info!("Saved lease server {}:{} ({} scope)", host, port, config.scope);
    }

    let server = client.get_server().await?;
    info!("Requesting lease from {}", server);
    client.request_lease().await?;

    let lease = client.lease();
    info!(
        "Lease granted (id {}), {} feature(s)",
        lease.lease_id.as_deref().unwrap_or("-"),
        lease.features.len()
    );
    for (name, value) in &lease.features {
        info!("Feature {} = {}", name, value);
    }

    let outcome = hold_lease(&client, ReceiverStream::new(events)).await?;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, client.shutdown()).await {
        Ok(Ok(())) => debug!("Client shut down"),
        Ok(Err(e)) => warn!("Lease release reported: {}", e),
        Err(_) => warn!("Lease release timed out after {:?}", SHUTDOWN_TIMEOUT),
    }

    Ok(outcome)
}

/// Log client events until a signal arrives or the lease is lost
async fn hold_lease(
    client: &LeaseClient,
    mut events: ReceiverStream<ClientEvent>,
) -> Result<Outcome> {
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => return Ok(Outcome::Signal(signal?)),
            event = events.next() => {
                let Some(event) = event else {
                    return Ok(Outcome::ClientGone);
                };

                match event {
                    ClientEvent::LeaseGranted { expires_at, .. } => {
                        debug!("Lease valid until {}", expires_at);
                    }
                    ClientEvent::LeaseRenewed {
                        expires_at,
                        features_changed,
                    } => {
                        info!(
                            "Lease renewed until {} (features changed: {})",
                            expires_at, features_changed
                        );
                    }
                    ClientEvent::RenewalFailed {
                        attempt,
                        error,
                        next_attempt_in,
                    } => match next_attempt_in {
                        Some(delay) => warn!(
                            "Renewal attempt {} failed: {} (retry in {:?})",
                            attempt, error, delay
                        ),
                        None => warn!(
                            "Renewal attempt {} failed: {} (no retry before expiry)",
                            attempt, error
                        ),
                    },
                    ClientEvent::Notification(LeaseEventKind::FeaturesChanged) => {
                        for (name, value) in client.features().iter() {
                            info!("Feature {} = {}", name, value);
                        }
                    }
                    ClientEvent::Notification(kind) if kind.is_expiry() => {
                        return Ok(Outcome::LeaseLost(kind));
                    }
                    ClientEvent::Notification(kind) => debug!("Notification {:?}", kind),
                    ClientEvent::LeaseDropped => debug!("Lease dropped"),
                }
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
