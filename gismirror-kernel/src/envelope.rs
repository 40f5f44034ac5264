//! Enveloppe push entrante : `{message: {data: <base64>}, subscription: ".../subscriptions/<nom>"}`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SubscriptionsConf;

pub const HOSTS_ARRAY: &str = "ns_tcc_hosts";
pub const EVENTS_ARRAY: &str = "ns_tcc_events";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("message data is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: String,
}

#[derive(Debug, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub data: String,
}

/// Lot d'entrées brutes, chacune validée individuellement ensuite
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Hosts(Vec<Value>),
    Events(Vec<Value>),
    /// Abonnement non configuré
    Unknown(String),
}

impl Batch {
    pub fn len(&self) -> usize {
        match self {
            Batch::Hosts(v) | Batch::Events(v) => v.len(),
            Batch::Unknown(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PushEnvelope {
    pub fn from_slice(body: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Dernier segment du chemin d'abonnement
    pub fn subscription_name(&self) -> &str {
        self.subscription.rsplit('/').next().unwrap_or_default()
    }

    pub fn decode_data(&self) -> Result<Value, EnvelopeError> {
        let bytes = STANDARD.decode(self.message.data.trim())?;
        let text = String::from_utf8(bytes)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn into_batch(self, subscriptions: &SubscriptionsConf) -> Result<Batch, EnvelopeError> {
        let name = self.subscription_name().to_string();
        let (array, hosts) = if name == subscriptions.host {
            (HOSTS_ARRAY, true)
        } else if name == subscriptions.event {
            (EVENTS_ARRAY, false)
        } else {
            return Ok(Batch::Unknown(name));
        };

        let mut data = self.decode_data()?;
        let entries = match data.get_mut(array).map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        Ok(if hosts { Batch::Hosts(entries) } else { Batch::Events(entries) })
    }
}

/// Construit une enveloppe push (outil de rejeu, tests)
pub fn encode_envelope(subscription: &str, data: &Value) -> Value {
    serde_json::json!({
        "message": {"data": STANDARD.encode(data.to_string())},
        "subscription": subscription,
    })
}
