//! Rejeu d'un lot JSON vers un kernel en cours d'exécution.
//!
//! Usage : test-integration <hosts|events> <lot.json> [url]
//! Le lot est enveloppé comme un push de souscription (data en base64)
//! puis posté sur `url` (par défaut http://127.0.0.1:8080/).

use anyhow::{bail, Context, Result};
use base64::Engine;
use log::{error, info};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_URL: &str = "http://127.0.0.1:8080/";
const HOSTS_SUBSCRIPTION: &str = "projects/replay/subscriptions/ns-tcc-hosts";
const EVENTS_SUBSCRIPTION: &str = "projects/replay/subscriptions/ns-tcc-events";

fn envelope(subscription: &str, batch: &Value) -> Value {
    let data = base64::engine::general_purpose::STANDARD.encode(batch.to_string());
    json!({
        "message": {"data": data},
        "subscription": subscription,
    })
}

/// Accepte un tableau nu ou un objet déjà sous la forme `{"ns_tcc_hosts": [...]}`
fn wrap_batch(kind: &str, raw: Value) -> Result<Value> {
    let array_name = match kind {
        "hosts" => "ns_tcc_hosts",
        "events" => "ns_tcc_events",
        other => bail!("unknown batch kind '{other}' (expected hosts or events)"),
    };
    Ok(match raw {
        Value::Array(entries) => json!({ array_name: entries }),
        Value::Object(map) if map.contains_key(array_name) => Value::Object(map),
        _ => bail!("batch file must hold an array or an object with '{array_name}'"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <hosts|events> <batch.json> [url]", args[0]);
    }
    let kind = args[1].as_str();
    let url = args.get(3).map(String::as_str).unwrap_or(DEFAULT_URL);

    let raw: Value = serde_json::from_str(
        &std::fs::read_to_string(&args[2]).with_context(|| format!("reading {}", args[2]))?,
    )
    .context("batch file is not valid JSON")?;
    let batch = wrap_batch(kind, raw)?;
    let subscription = if kind == "hosts" { HOSTS_SUBSCRIPTION } else { EVENTS_SUBSCRIPTION };

    let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
    info!("Replaying {kind} batch to {url}");
    let response = client.post(url).json(&envelope(subscription, &batch)).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("Kernel answered {status}: {body}");
        bail!("replay failed with {status}");
    }
    info!("Kernel acknowledged with {status}");

    let health: Value = client
        .get(url.trim_end_matches('/').to_string() + "/system/health")
        .send()
        .await?
        .json()
        .await?;
    info!("Kernel health: {health}");
    Ok(())
}
