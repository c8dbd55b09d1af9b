//! Basic query submission.
//!
//! Demonstrates:
//! - Building a client with API-key authentication
//! - Queueing a query before connect
//! - Streaming query messages to a callback
//! - Waiting for completion and disconnecting
//!
//! Usage:
//!   BAYEUX_USER=<user-guid> BAYEUX_API_KEY=<key> BAYEUX_CONNECTOR=<guid> \
//!     cargo run --example basic_query
//!   ... cargo run --example basic_query -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::env;

use anyhow::{Context, Result};
use bayeux_query::{Client, MessageType, Submission};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_URL: &str = "https://example.com";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = env::args().any(|arg| arg == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== Basic Query ===\n");

    let user = env::var("BAYEUX_USER").context("BAYEUX_USER is not set")?;
    let api_key = env::var("BAYEUX_API_KEY").context("BAYEUX_API_KEY is not set")?;
    let connector = env::var("BAYEUX_CONNECTOR").context("BAYEUX_CONNECTOR is not set")?;
    let url = env::var("BAYEUX_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());

    // ========================================================================
    // Build Client
    // ========================================================================

    println!("[1] Building client...");
    let client = Client::builder().api_key(user, api_key).build()?;
    println!("    ✓ Client ready\n");

    // ========================================================================
    // Queue Query
    // ========================================================================

    println!("[2] Queueing query for {url}...");
    let submission = client
        .query(
            json!({
                "connectorGuids": [connector],
                "input": { "webpage/url": url }
            }),
            |tracker, message| match message.message_type() {
                MessageType::Message => {
                    let rows = message.results().map_or(0, Vec::len);
                    println!("    ← {rows} result(s) for {}", tracker.request_id());
                }
                other => println!(
                    "    ← {other} (started {}, completed {})",
                    tracker.jobs_started(),
                    tracker.jobs_completed()
                ),
            },
        )
        .await?;
    assert_eq!(submission, Submission::Queued);
    println!("    ✓ Held until connect\n");

    // ========================================================================
    // Connect and Wait
    // ========================================================================

    println!("[3] Connecting...");
    client.connect().await?;
    println!("    ✓ Connected as {:?}\n", client.session().client_id());

    println!("[4] Waiting for results...");
    client.join().await;
    println!("    ✓ All queries finished\n");

    client.disconnect().await;
    println!("=== Done ===");
    Ok(())
}

// ============================================================================
// Functions
// ============================================================================

fn init_logging(debug: bool) {
    let filter = if debug {
        "bayeux_query=debug"
    } else {
        "bayeux_query=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
