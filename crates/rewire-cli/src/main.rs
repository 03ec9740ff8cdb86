//! rewire-ctl - administration CLI for the rewire daemon.
//!
//! Creates and toggles expectations over the daemon's admin API and prints
//! the instrumentation snippets operators paste into their jobs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod client;

use client::AdminClient;

/// rewire-ctl - rewire administration CLI
#[derive(Parser, Debug)]
#[command(name = "rewire-ctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base URL of the rewire daemon
    #[arg(long)]
    base_url: String,

    /// Admin API bearer token
    #[arg(long)]
    admin_token: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a schedule expectation
    NewSchedule {
        /// Expectation display name
        #[arg(long)]
        name: String,

        /// Owner contact (email address for the email channel)
        #[arg(long)]
        contact: String,

        /// Expected seconds between run starts
        #[arg(long)]
        expected_interval_s: i64,

        /// Grace period in seconds
        #[arg(long, default_value = "0")]
        tolerance_s: i64,

        /// Max runtime before a longrun violation (0 disables)
        #[arg(long, default_value = "0")]
        max_runtime_s: i64,

        /// Min gap between runs (0 disables)
        #[arg(long, default_value = "0")]
        min_spacing_s: i64,

        /// Allow overlapping runs
        #[arg(long)]
        allow_overlap: bool,
    },

    /// Create an alert-path expectation
    NewAlertpath {
        /// Expectation display name
        #[arg(long)]
        name: String,

        /// Owner contact (where synthetic tests are sent)
        #[arg(long)]
        contact: String,

        /// Seconds between synthetic tests
        #[arg(long)]
        test_interval_s: i64,

        /// Seconds allowed to acknowledge a test
        #[arg(long)]
        ack_window_s: i64,

        /// Expected interval (informational for alert paths)
        #[arg(long, default_value = "3600")]
        expected_interval_s: i64,

        /// Grace period in seconds
        #[arg(long, default_value = "0")]
        tolerance_s: i64,
    },

    /// Enable an expectation
    Enable {
        /// Expectation ID
        #[arg(long)]
        id: String,
    },

    /// Disable an expectation
    Disable {
        /// Expectation ID
        #[arg(long)]
        id: String,
    },

    /// Show an expectation and its recent observations
    Show {
        /// Expectation ID
        #[arg(long)]
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let client = AdminClient::new(&cli.base_url, &cli.admin_token)?;

    match cli.command {
        Commands::NewSchedule {
            name,
            contact,
            expected_interval_s,
            tolerance_s,
            max_runtime_s,
            min_spacing_s,
            allow_overlap,
        } => {
            let params = serde_json::json!({
                "max_runtime_s": max_runtime_s,
                "min_spacing_s": min_spacing_s,
                "allow_overlap": allow_overlap,
            });
            let out = client.post_form(
                "/admin/new",
                &[
                    ("type", "schedule".to_string()),
                    ("name", name),
                    ("contact", contact),
                    ("expected_interval_s", expected_interval_s.to_string()),
                    ("tolerance_s", tolerance_s.to_string()),
                    ("params_json", params.to_string()),
                ],
            )?;
            println!("{}", serde_json::to_string_pretty(&out)?);

            if let Some(observe_url) = out["observe_url"].as_str() {
                println!("\nInstrument your job:");
                println!("  curl -fsS -X POST '{observe_url}' -d kind=start");
                println!("  # ... do work ...");
                println!("  curl -fsS -X POST '{observe_url}' -d kind=end");
            }
        }

        Commands::NewAlertpath {
            name,
            contact,
            test_interval_s,
            ack_window_s,
            expected_interval_s,
            tolerance_s,
        } => {
            let params = serde_json::json!({
                "test_interval_s": test_interval_s,
                "ack_window_s": ack_window_s,
            });
            let out = client.post_form(
                "/admin/new",
                &[
                    ("type", "alert_path".to_string()),
                    ("name", name),
                    ("contact", contact.clone()),
                    ("expected_interval_s", expected_interval_s.to_string()),
                    ("tolerance_s", tolerance_s.to_string()),
                    ("params_json", params.to_string()),
                ],
            )?;
            println!("{}", serde_json::to_string_pretty(&out)?);
            println!("\nSynthetic tests will be sent to {contact}");
            println!("ACK via the /ack/<trial> link in each message.");
        }

        Commands::Enable { id } => {
            let out = client.post_form("/admin/enable", &[("id", id)])?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        Commands::Disable { id } => {
            let out = client.post_form("/admin/disable", &[("id", id)])?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        Commands::Show { id } => {
            let out = client.get_json(&format!("/observe/{id}"))?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}
