//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an [`Action`] carrying the full server
//! configuration.

use anyhow::{Context, Result};
use secrecy::SecretString;

use crate::cli::actions::{server::Args, Action};

fn required<T: Clone + Send + Sync + 'static>(matches: &clap::ArgMatches, name: &str) -> Result<T> {
    matches
        .get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let paywall_amount: u64 = required(matches, "paywall-amount")?;
    let paywall_backend_url = matches.get_one::<String>("paywall-backend-url").cloned();
    if paywall_amount > 0 && paywall_backend_url.is_none() {
        anyhow::bail!("missing required argument: --paywall-backend-url (paywall amount is set)");
    }

    Ok(Action::Server(Args {
        port: required(matches, "port")?,
        dsn: matches
            .get_one::<String>("dsn")
            .map(|dsn| SecretString::from(dsn.clone())),
        frontend_base_url: required(matches, "frontend-base-url")?,
        session_ttl_seconds: required(matches, "session-ttl-seconds")?,
        verification_token_ttl_seconds: required(matches, "verification-token-ttl-seconds")?,
        max_failed_logins: required(matches, "max-failed-logins")?,
        min_password_length: required(matches, "min-password-length")?,
        paywall_amount,
        paywall_confirmations: required(matches, "paywall-confirmations")?,
        paywall_poll_window_seconds: required(matches, "paywall-poll-window-seconds")?,
        paywall_poll_interval_seconds: required(matches, "paywall-poll-interval-seconds")?,
        paywall_backend_url,
        paywall_timeout_seconds: required(matches, "paywall-timeout-seconds")?,
    }))
}
