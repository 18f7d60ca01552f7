//! FxHub command-line client.
//!
//! Thin wrapper over the `fxhub` library for poking a running hub by hand:
//! send events, read and write state, and watch pushed events.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fxhub::{CallOptions, HubClient, HubConfig, Response};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "fxhub")]
#[command(version)]
#[command(about = "Talk to an FxHub process")]
struct Cli {
    /// Hub address as host:port (overrides config and FXHUB_ADDR)
    #[arg(long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit an event through the hub
    Send {
        /// Application id
        app_id: String,
        /// Event type
        event_type: String,
        /// JSON value forwarded to listeners as `data`
        #[arg(long)]
        data: Option<String>,
    },
    /// Store an application's state
    SetState {
        /// Application id
        app_id: String,
        /// State as JSON
        state: String,
    },
    /// Print an application's stored state
    State {
        /// Application id
        app_id: String,
    },
    /// Print pushed events as JSON lines until the hub closes the stream
    Listen {
        /// Routes to watch, as app-id:type
        #[arg(required = true)]
        routes: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let mut config = HubConfig::load()?;
    if let Some(addr) = &cli.addr {
        let parsed = HubConfig::from_addr(addr).context("Invalid --addr")?;
        config.host = parsed.host;
        config.port = parsed.port;
    }

    // Nothing is dialed until the first call
    let client = HubClient::new(config);
    match cli.command {
        Commands::Send {
            app_id,
            event_type,
            data,
        } => {
            let reply = match data {
                Some(data) => client.send_event_with_data(
                    &app_id,
                    &event_type,
                    parse_json(&data)?,
                    CallOptions::sync(),
                ),
                None => client.send_event(&app_id, &event_type, CallOptions::sync()),
            };
            print_response(reply.wait())?;
        }
        Commands::SetState { app_id, state } => {
            let reply = client.set_state(&app_id, parse_json(&state)?, CallOptions::sync());
            print_response(reply.wait())?;
        }
        Commands::State { app_id } => {
            print_response(Some(client.fetch_state(&app_id)))?;
        }
        Commands::Listen { routes } => {
            for route in &routes {
                let (app_id, event_type) = route
                    .split_once(':')
                    .with_context(|| format!("Route {route:?} is not app-id:type"))?;
                client.add_listener(app_id, event_type, |event| {
                    match serde_json::to_string(event.payload()) {
                        Ok(line) => println!("{line}"),
                        Err(e) => log::warn!("Could not print event: {e}"),
                    }
                });
            }
            let summary = client.listen()?;
            log::info!(
                "Stream ended after {} event(s), {} unrouted",
                summary.delivered,
                summary.routing_misses
            );
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(client.config())?);
        }
    }

    client.close();
    Ok(())
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("Not valid JSON: {text}"))
}

fn print_response(response: Option<Response>) -> Result<()> {
    let Some(response) = response else {
        bail!("call did not complete");
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_success() {
        bail!(
            "hub call failed: {}",
            response.error().unwrap_or("unknown error")
        );
    }
    Ok(())
}
