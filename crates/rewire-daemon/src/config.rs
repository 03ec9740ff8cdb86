//! Daemon configuration: command-line flags, validation, and notifier
//! selection.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use secrecy::SecretString;

use rewire_core::notify::{
    EmailNotifier, Notifier, NotifierStack, SmtpSettings, StderrNotifier, WebhookNotifier,
};

/// rewire daemon - expectation verifier
#[derive(Parser, Debug)]
#[command(name = "rewire-daemon")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the SQLite database (created on first start)
    #[arg(long)]
    pub db: PathBuf,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    pub listen: IpAddr,

    /// Listen port
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Public base URL used to build observe and ack links
    #[arg(long)]
    pub base_url: String,

    /// Bearer token for the /admin endpoints
    #[arg(long, default_value = "dev-admin-token")]
    pub admin_token: String,

    /// Checker interval in seconds
    #[arg(long, default_value = "60")]
    pub check_every: u64,

    /// Re-notify open violations after this many seconds (0 disables)
    #[arg(long, default_value = "0")]
    pub renotify_after: i64,

    /// SMTP server hostname (absent selects stderr dev mode)
    #[arg(long)]
    pub smtp_host: Option<String>,

    /// SMTP port
    #[arg(long, default_value = "587")]
    pub smtp_port: u16,

    /// SMTP username
    #[arg(long)]
    pub smtp_user: Option<String>,

    /// SMTP password
    #[arg(long)]
    pub smtp_pass: Option<String>,

    /// From address for notification email
    #[arg(long, default_value = "rewire@localhost")]
    pub from_email: String,

    /// Webhook URL receiving violation JSON payloads
    #[arg(long)]
    pub webhook_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Audit ledger invariants against the store and exit
    #[arg(long)]
    pub verify_invariants: bool,
}

/// Validated configuration derived from [`Args`].
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub base_url: String,
    pub admin_token: SecretString,
    pub check_every: Duration,
    pub renotify_after_s: i64,
}

impl DaemonConfig {
    /// Validate the flag set.
    ///
    /// # Errors
    ///
    /// Fails on an empty or schemeless base URL, a zero check interval, or a
    /// negative renotify interval. These are fatal init errors (exit 1).
    pub fn from_args(args: &Args) -> Result<Self> {
        let base_url = args.base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            bail!("--base-url must start with http:// or https://");
        }
        if args.check_every == 0 {
            bail!("--check-every must be >= 1");
        }
        if args.renotify_after < 0 {
            bail!("--renotify-after must be >= 0");
        }

        Ok(Self {
            db_path: args.db.clone(),
            listen_addr: SocketAddr::new(args.listen, args.port),
            base_url,
            admin_token: SecretString::from(args.admin_token.clone()),
            check_every: Duration::from_secs(args.check_every),
            renotify_after_s: args.renotify_after,
        })
    }

    /// Per-delivery deadline: half the checker interval, so a stuck SMTP
    /// server or webhook endpoint cannot starve the loop.
    #[must_use]
    pub fn delivery_deadline(&self) -> Duration {
        self.check_every / 2
    }
}

/// Assemble the notification channels the flags select.
///
/// SMTP and webhook can be active together; with neither configured the
/// stderr dev notifier stands in so local deployments still show what would
/// have been sent.
///
/// # Errors
///
/// Fails when a configured channel cannot be constructed (bad relay host,
/// bad from-address).
pub fn build_notifier_stack(args: &Args) -> Result<NotifierStack> {
    let mut channels: Vec<Box<dyn Notifier>> = Vec::new();

    if let Some(host) = &args.smtp_host {
        let credentials = match (&args.smtp_user, &args.smtp_pass) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };
        let email = EmailNotifier::from_settings(&SmtpSettings {
            host: host.clone(),
            port: args.smtp_port,
            credentials,
            from: args.from_email.clone(),
        })
        .context("invalid SMTP configuration")?;
        channels.push(Box::new(email));
    }

    if let Some(url) = &args.webhook_url {
        let webhook = WebhookNotifier::new(url.clone()).context("invalid webhook configuration")?;
        channels.push(Box::new(webhook));
    }

    if channels.is_empty() {
        channels.push(Box::new(StderrNotifier));
    }

    Ok(NotifierStack::new(channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from([
            "rewire-daemon",
            "--db",
            "/tmp/rewire.db",
            "--base-url",
            "https://rewire.example.com",
        ])
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::from_args(&base_args()).unwrap();
        assert_eq!(config.check_every, Duration::from_secs(60));
        assert_eq!(config.renotify_after_s, 0);
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.delivery_deadline(), Duration::from_secs(30));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let mut args = base_args();
        args.base_url = "https://rewire.example.com/".into();
        let config = DaemonConfig::from_args(&args).unwrap();
        assert_eq!(config.base_url, "https://rewire.example.com");
    }

    #[test]
    fn test_rejects_schemeless_base_url() {
        let mut args = base_args();
        args.base_url = "rewire.example.com".into();
        assert!(DaemonConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_rejects_zero_check_interval() {
        let mut args = base_args();
        args.check_every = 0;
        assert!(DaemonConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_dev_mode_falls_back_to_stderr() {
        let stack = build_notifier_stack(&base_args());
        assert!(stack.is_ok());
    }
}
