use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::account::store::{MemoryUserStore, PgUserStore, UserStore};
use crate::api;
use crate::notify::LogNotifier;
use crate::now_unix;
use crate::paywall::{
    spawn_paywall_poller, AddressDeriver, HttpPaywallBackend, PaywallConfig, TxLookup,
    UnconfiguredPaywall,
};
use crate::session::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::state::{AppState, AuthConfig, Backends};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub verification_token_ttl_seconds: i64,
    pub max_failed_logins: u32,
    pub min_password_length: usize,
    pub paywall_amount: u64,
    pub paywall_confirmations: u32,
    pub paywall_poll_window_seconds: i64,
    pub paywall_poll_interval_seconds: u64,
    pub paywall_backend_url: Option<String>,
    pub paywall_timeout_seconds: u64,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.frontend_base_url.clone())
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_verification_token_ttl_seconds(self.verification_token_ttl_seconds)
            .with_max_failed_logins(self.max_failed_logins)
            .with_min_password_length(self.min_password_length)
    }

    fn paywall_config(&self) -> PaywallConfig {
        PaywallConfig::new(self.paywall_amount)
            .with_confirmations(self.paywall_confirmations)
            .with_poll_window_seconds(self.paywall_poll_window_seconds)
            .with_poll_interval_seconds(self.paywall_poll_interval_seconds)
            .with_timeout(Duration::from_secs(self.paywall_timeout_seconds))
    }
}

/// Handle the server action
///
/// # Errors
/// Returns an error if the stores, the paywall backend or the listener cannot be set up.
pub async fn handle(args: Args) -> Result<()> {
    let auth_config = args.auth_config();
    let paywall_config = args.paywall_config();

    let (users, sessions) = stores(args.dsn.as_ref()).await?;

    let (deriver, lookup): (Arc<dyn AddressDeriver>, Arc<dyn TxLookup>) =
        match args.paywall_backend_url.as_deref() {
            Some(url) if paywall_config.enabled() => {
                let backend = Arc::new(HttpPaywallBackend::new(url, paywall_config.timeout())?);
                let deriver: Arc<dyn AddressDeriver> = backend.clone();
                let lookup: Arc<dyn TxLookup> = backend;
                (deriver, lookup)
            }
            _ => {
                let unconfigured = Arc::new(UnconfiguredPaywall);
                let deriver: Arc<dyn AddressDeriver> = unconfigured.clone();
                let lookup: Arc<dyn TxLookup> = unconfigured;
                (deriver, lookup)
            }
        };

    let state = Arc::new(AppState::new(
        auth_config,
        paywall_config,
        Backends {
            users,
            sessions: Arc::clone(&sessions),
            notifier: Arc::new(LogNotifier),
            deriver,
            lookup,
        },
    )?);

    let poller = paywall_config
        .enabled()
        .then(|| spawn_paywall_poller(Arc::clone(state.paywall())));
    let sweeper = spawn_session_sweeper(sessions);

    let result = api::serve(args.port, state, shutdown_signal()).await;

    if let Some(poller) = poller {
        poller.abort();
    }
    sweeper.abort();
    info!("Gracefully shutdown");

    result
}

async fn stores(
    dsn: Option<&SecretString>,
) -> Result<(Arc<dyn UserStore>, Arc<dyn SessionStore>)> {
    let Some(dsn) = dsn else {
        warn!("No --dsn given, using in-memory stores; all state is lost on restart");
        let users: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        return Ok((users, sessions));
    };

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool.clone()));
    let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool));
    Ok((users, sessions))
}

/// Periodically drop expired sessions; resolution already ignores them.
fn spawn_session_sweeper(sessions: Arc<dyn SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(SESSION_PURGE_INTERVAL).await;

            match sessions.purge_expired(now_unix()).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "purged expired sessions"),
                Err(err) => error!("failed to purge expired sessions: {err:#}"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!("Failed to listen for SIGTERM: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
