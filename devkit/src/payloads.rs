/*!
Builders de payloads host / event au format du flux de supervision

Chaque builder part d'un payload valide et complet ; les méthodes permettent
de modifier un champ, d'en retirer un ou de le rendre invalide.
*/

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};

/// Horodatage par défaut des payloads : 2021-03-04T10:00:00Z
pub fn default_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 4, 10, 0, 0).single().unwrap_or_else(Utc::now)
}

/// Epoch ms de `default_time()`
pub const DEFAULT_TIME_MS: i64 = 1_614_852_000_000;

#[derive(Debug, Clone)]
pub struct HostPayloadBuilder {
    fields: Map<String, Value>,
}

impl HostPayloadBuilder {
    pub fn new(sitename: &str, hostname: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), json!(format!("{sitename}_{hostname}")));
        fields.insert("sitename".into(), json!(sitename));
        fields.insert("hostname".into(), json!(hostname));
        fields.insert("decommissioned".into(), json!(false));
        fields.insert("host_groups".into(), json!(["core"]));
        fields.insert("bss_global_coverage".into(), json!({"realvalue": "NL", "value": "nl"}));
        fields.insert("bss_hw_family".into(), json!({"realvalue": "ASR", "value": "asr"}));
        fields.insert("bss_lifecycle_status".into(), json!({"realvalue": "LIVE", "value": "live"}));
        fields.insert("longitude".into(), json!({"value": 4.89}));
        fields.insert("latitude".into(), json!({"value": 52.37}));
        fields.insert("timestamp".into(), json!(default_time().to_rfc3339()));
        Self { fields }
    }

    pub fn set_field<S: Into<String>>(mut self, field: S, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn without(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self
    }

    pub fn decommissioned(self) -> Self {
        self.set_field("decommissioned", json!(true))
    }

    pub fn hw_family(self, realvalue: &str) -> Self {
        self.set_field("bss_hw_family", json!({"realvalue": realvalue, "value": realvalue.to_lowercase()}))
    }

    pub fn host_groups(self, groups: &[&str]) -> Self {
        self.set_field("host_groups", json!(groups))
    }

    pub fn build(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[derive(Debug, Clone)]
pub struct EventPayloadBuilder {
    fields: Map<String, Value>,
}

impl EventPayloadBuilder {
    /// `service` vide = event de niveau host
    pub fn new(sitename: &str, hostname: &str, service: &str) -> Self {
        let kind = if service.is_empty() { "HOST" } else { "SERVICE" };
        let mut fields = Map::new();
        fields.insert("id".into(), json!(1));
        fields.insert("sitename".into(), json!(sitename));
        fields.insert("hostname".into(), json!(hostname));
        fields.insert("service_description".into(), json!(service));
        fields.insert("type".into(), json!(kind));
        fields.insert("state_type".into(), json!("HARD"));
        fields.insert("output".into(), json!(format!("{kind} OK")));
        fields.insert("long_output".into(), json!(""));
        fields.insert("event_state".into(), json!(0));
        fields.insert("timestamp".into(), json!(default_time().to_rfc3339()));
        Self { fields }
    }

    pub fn set_field<S: Into<String>>(mut self, field: S, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn without(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self
    }

    pub fn state(self, event_state: i64, output: &str) -> Self {
        self.set_field("event_state", json!(event_state)).set_field("output", json!(output))
    }

    pub fn build(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}
