// # epsyncd - Endpoint Synchronizer
//
// Runs one synchronization pass and exits. Scheduling (cron, systemd timer,
// device iCall) is external; every invocation is a complete, independent
// pass.
//
// The epsyncd binary is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Taking the pass lock
// 4. Wiring the HTTPS endpoint service and the tmsh device into the engine
// 5. Mapping the pass outcome to an exit code
//
// All synchronization logic lives in epsync-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Targets
// - `EPSYNC_TARGETS`: Comma-separated subset of url-category, url-dg, ipv4, ipv6
//   (default: url-dg,ipv4)
// - `EPSYNC_SERVICE_AREAS`: Comma-separated service areas
//   (default: Common,Exchange,SharePoint,Skype,Yammer)
// - `EPSYNC_FORCE_REFRESH`: Reconcile even if the version is unchanged
//
// ### Provider
// - `EPSYNC_INSTANCE`: Worldwide, USGovDoD, USGovGCCHigh, China, Germany
// - `EPSYNC_SERVICE_URL`: Endpoint web service root
//
// ### Device
// - `EPSYNC_HA_ENABLED`: Device is part of a sync-failover group
// - `EPSYNC_DEVICE_GROUP`: Group to sync after saving (default: device-group1)
// - `EPSYNC_MODE`: live or dry-run
//
// ### Storage and Logging
// - `EPSYNC_WORK_DIR`: Identity, version, artifact and lock files
// - `EPSYNC_LOG_LEVEL`: trace, debug, info, warn, error
// - `EPSYNC_LOG_FILE`: Append logs to this file instead of stderr
//
// ## Example
//
// ```bash
// export EPSYNC_TARGETS=url-category,url-dg,ipv4,ipv6
// export EPSYNC_SERVICE_AREAS=Exchange,SharePoint
// export EPSYNC_HA_ENABLED=true
// export EPSYNC_DEVICE_GROUP=dg-prod
//
// epsyncd
// ```

use anyhow::Result;
use epsync_core::config::{Instance, SyncConfig, TargetToggles};
use epsync_core::engine::PassOutcome;
use epsync_core::reconcile::TargetKind;
use epsync_core::ServiceArea;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
///
/// - 0: Clean pass (synced, not writer, or up to date)
/// - 1: Configuration or startup error
/// - 2: Runtime error, including targets that failed to reconcile
/// - 3: Endpoint list could not be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EpsyncExitCode {
    /// Pass completed
    Clean = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
    /// Endpoint list fetch failed
    FetchError = 3,
}

impl From<EpsyncExitCode> for ExitCode {
    fn from(code: EpsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Device mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Live,
    DryRun,
}

/// Application configuration
struct Config {
    sync: SyncConfig,
    mode: Mode,
    log_level: String,
    log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut sync = SyncConfig::new();

        if let Some(targets) = var("EPSYNC_TARGETS") {
            sync.targets = parse_targets(&targets)?;
        }
        if let Some(areas) = var("EPSYNC_SERVICE_AREAS") {
            sync.service_areas = parse_service_areas(&areas)?;
        }
        if let Some(force) = var("EPSYNC_FORCE_REFRESH") {
            sync.force_refresh = parse_bool("EPSYNC_FORCE_REFRESH", &force)?;
        }
        if let Some(ha) = var("EPSYNC_HA_ENABLED") {
            sync.ha.enabled = parse_bool("EPSYNC_HA_ENABLED", &ha)?;
        }
        if let Some(group) = var("EPSYNC_DEVICE_GROUP") {
            sync.ha.device_group = group;
        }
        if let Some(instance) = var("EPSYNC_INSTANCE") {
            sync.instance = instance.parse::<Instance>()?;
        }
        if let Some(url) = var("EPSYNC_SERVICE_URL") {
            sync.service_url = url;
        }
        if let Some(dir) = var("EPSYNC_WORK_DIR") {
            sync.storage.work_dir = PathBuf::from(dir);
        }

        let mode = match var("EPSYNC_MODE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("live") => Mode::Live,
            Some("dry-run") => Mode::DryRun,
            Some(other) => anyhow::bail!(
                "EPSYNC_MODE '{}' is not valid. Valid modes: live, dry-run",
                other
            ),
        };

        Ok(Self {
            sync,
            mode,
            log_level: var("EPSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_file: var("EPSYNC_LOG_FILE").map(PathBuf::from),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.sync.validate()?;

        if !self.sync.service_url.starts_with("https://")
            && !self.sync.service_url.starts_with("http://")
        {
            anyhow::bail!(
                "EPSYNC_SERVICE_URL must use HTTP or HTTPS scheme. Got: {}",
                self.sync.service_url
            );
        }

        parse_level(&self.log_level)?;
        Ok(())
    }
}

/// Non-empty environment variable
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be true or false. Got: {}", name, value),
    }
}

fn parse_targets(value: &str) -> Result<TargetToggles> {
    let mut toggles = TargetToggles::none();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = match item.to_lowercase().as_str() {
            "url-category" => TargetKind::UrlCategory,
            "url-dg" | "url-data-group" => TargetKind::UrlDataGroup,
            "ipv4" => TargetKind::Ipv4DataGroup,
            "ipv6" => TargetKind::Ipv6DataGroup,
            _ => anyhow::bail!(
                "EPSYNC_TARGETS entry '{}' is not valid. \
                Valid targets: url-category, url-dg, ipv4, ipv6",
                item
            ),
        };
        toggles = toggles.with(kind, true);
    }
    Ok(toggles)
}

fn parse_service_areas(value: &str) -> Result<Vec<ServiceArea>> {
    let mut areas = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let area: ServiceArea = item.parse()?;
        if !areas.contains(&area) {
            areas.push(area);
        }
    }
    Ok(areas)
}

fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "EPSYNC_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

/// Install the global subscriber, writing to stderr or appending to a file
fn init_tracing(level: Level, log_file: Option<&PathBuf>) -> Result<()> {
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", path.display(), e))?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EpsyncExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return EpsyncExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = parse_level(&config.log_level).unwrap_or(Level::INFO);
    if let Err(e) = init_tracing(log_level, config.log_file.as_ref()) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return EpsyncExitCode::ConfigError.into();
    }

    info!(
        "Starting epsyncd ({}, targets: {:?})",
        if config.mode == Mode::DryRun { "DRY-RUN" } else { "LIVE" },
        config.sync.targets.enabled()
    );

    // One pass, no internal concurrency
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return EpsyncExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run(config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Pass failed: {:#}", e);
                exit_code_for(&e)
            }
        }
    });

    code.into()
}

/// Distinguish a failed endpoint fetch from other failures
fn exit_code_for(err: &anyhow::Error) -> EpsyncExitCode {
    match err.downcast_ref::<epsync_core::Error>() {
        Some(e) if e.is_fetch_failure() => EpsyncExitCode::FetchError,
        _ => EpsyncExitCode::RuntimeError,
    }
}

/// Run one pass
#[cfg(all(feature = "http", feature = "tmsh"))]
async fn run(config: Config) -> Result<EpsyncExitCode> {
    use epsync_core::state::{FileArtifactStore, FileStateStore, PassLock};
    use epsync_core::SyncEngine;
    use epsync_device_tmsh::TmshDevice;
    use epsync_source_http::HttpEndpointService;
    use std::time::Duration;

    let storage = &config.sync.storage;
    let _lock = PassLock::acquire(
        storage.lock_path(),
        Duration::from_secs(storage.lock_stale_secs),
    )
    .await?;

    let state_store = FileStateStore::from_config(storage).await?;
    let artifacts = FileArtifactStore::new(&storage.work_dir).await?;
    let endpoints = HttpEndpointService::from_config(&config.sync)?;
    let device = TmshDevice::new(config.mode == Mode::DryRun);

    let (engine, mut events) = SyncEngine::new(
        Box::new(endpoints),
        Box::new(device),
        Box::new(state_store),
        Box::new(artifacts),
        config.sync,
    )?;

    let outcome = engine.run_pass().await;

    while let Ok(event) = events.try_recv() {
        debug!("Pass event: {:?}", event);
    }

    let code = match outcome? {
        PassOutcome::NotWriter => EpsyncExitCode::Clean,
        PassOutcome::UpToDate { version } => {
            info!("Already at version {}", version);
            EpsyncExitCode::Clean
        }
        PassOutcome::Synced(report) => {
            info!(
                "Synchronized version {}: {} targets converged, {} failed (saved: {}, synced: {})",
                report.version.as_deref().unwrap_or("unknown"),
                report.results.len(),
                report.failures.len(),
                report.saved,
                report.synced
            );
            if report.is_clean() {
                EpsyncExitCode::Clean
            } else {
                for failure in &report.failures {
                    warn!("Target failed: {}", failure);
                }
                EpsyncExitCode::RuntimeError
            }
        }
    };

    Ok(code)
}

/// Without both collaborators there is nothing to run against
#[cfg(not(all(feature = "http", feature = "tmsh")))]
async fn run(_config: Config) -> Result<EpsyncExitCode> {
    anyhow::bail!("epsyncd was built without the http and tmsh features")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        let toggles = parse_targets("url-category, ipv6").unwrap();
        assert_eq!(
            toggles.enabled(),
            vec![TargetKind::UrlCategory, TargetKind::Ipv6DataGroup]
        );

        let toggles = parse_targets("url-dg,ipv4").unwrap();
        assert_eq!(toggles, TargetToggles::default());

        assert!(parse_targets("ipv5").is_err());
        assert!(!parse_targets("").unwrap().any());
    }

    #[test]
    fn test_parse_service_areas() {
        let areas = parse_service_areas("exchange, SharePoint,exchange,Teams").unwrap();
        assert_eq!(
            areas,
            vec![ServiceArea::Exchange, ServiceArea::SharePoint, ServiceArea::Skype]
        );
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_exit_code_for_fetch_failure() {
        let fetch: anyhow::Error = epsync_core::Error::transport_status(503, "unavailable").into();
        assert_eq!(exit_code_for(&fetch), EpsyncExitCode::FetchError);

        let malformed: anyhow::Error = epsync_core::Error::malformed("not a list").into();
        assert_eq!(exit_code_for(&malformed), EpsyncExitCode::FetchError);

        let locked: anyhow::Error = epsync_core::Error::locked("held").into();
        assert_eq!(exit_code_for(&locked), EpsyncExitCode::RuntimeError);
    }
}
