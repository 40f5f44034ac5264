/**
 * MODÈLES - Payloads du flux de supervision et enregistrements du store
 *
 * RÔLE :
 * Ce module décrit les deux formes que prend chaque objet dans le système :
 * le payload brut reçu du flux (host ou event) et l'enregistrement canonique
 * conservé dans le store documentaire (collections "hosts" et "events").
 *
 * FONCTIONNEMENT :
 * - Les payloads sont désérialisés entrée par entrée puis normalisés
 *   (géométrie obligatoire, timestamp en epoch ms, attributs BSS extraits)
 * - Toute erreur de normalisation produit un `ValidationError` avant la
 *   moindre écriture
 * - Les enregistrements savent produire leurs attributs de feature distante
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Clé réservée portant l'objectId dans les attributs d'un `update`.
pub const OBJECT_ID_FIELD: &str = "objectid";
pub const ENDTIME_FIELD: &str = "endtime";

/// Erreurs de validation d'un payload entrant
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload does not decode: {0}")]
    Decode(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("missing or null geometry: {0}")]
    MissingGeometry(&'static str),
    #[error("invalid coordinate {field}: {value}")]
    InvalidCoordinate { field: &'static str, value: String },
    #[error("unparseable timestamp: {0}")]
    Timestamp(String),
    #[error("invalid severity: {0}")]
    Severity(String),
    #[error("BSS attributes carry neither a complete `realvalue` nor a complete `value` shape")]
    BssShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey(String);

impl HostKey {
    pub fn new(sitename: &str, hostname: &str) -> Self {
        Self(format!("{sitename}_{hostname}"))
    }

    /// Clé déjà composée (chemin HTTP, fichier du store)
    pub fn from_raw(key: &str) -> Self {
        Self(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Clé d'archive d'une génération précédente
    pub fn archived(&self, generation: u32) -> String {
        format!("{}@{}", self.0, generation)
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey(String);

impl EventKey {
    /// Les `/` sont retirés : ils ne sont pas admis dans un identifiant de document.
    pub fn new(sitename: &str, hostname: &str, service: &str) -> Self {
        Self(format!("{sitename}_{hostname}_{service}").replace('/', ""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Origine de l'état dominant d'un host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    #[default]
    Host,
    Service,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Host => "HOST",
            EventKind::Service => "SERVICE",
        }
    }
}

/// Code couleur SIG : les états SERVICE sont décalés de 9 pour avoir leur propre palette.
pub fn giskleur(status: i64, kind: EventKind) -> i64 {
    match kind {
        EventKind::Host => status,
        EventKind::Service => status + 9,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

// ===== Attributs suivis d'un host =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackedField {
    HostGroups,
    GlobalCoverage,
    HwFamily,
    LifecycleStatus,
}

impl TrackedField {
    pub const ALL: [TrackedField; 4] = [
        TrackedField::HostGroups,
        TrackedField::GlobalCoverage,
        TrackedField::HwFamily,
        TrackedField::LifecycleStatus,
    ];

    /// Nom du champ dans le store
    pub fn store_name(&self) -> &'static str {
        match self {
            TrackedField::HostGroups => "hostgroups",
            TrackedField::GlobalCoverage => "bssglobalcoverage",
            TrackedField::HwFamily => "bsshwfamily",
            TrackedField::LifecycleStatus => "bsslifecyclestatus",
        }
    }

    /// Nom de l'attribut dans la couche SIG
    pub fn remote_name(&self) -> &'static str {
        match self {
            TrackedField::HostGroups => "host_groups",
            TrackedField::GlobalCoverage => "globalcoverage",
            TrackedField::HwFamily => "hwfamily",
            TrackedField::LifecycleStatus => "lifecyclestatus",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAttributes {
    pub hostgroups: Option<String>,
    pub bssglobalcoverage: Option<String>,
    pub bsshwfamily: Option<String>,
    pub bsslifecyclestatus: Option<String>,
}

impl TrackedAttributes {
    pub fn get(&self, field: TrackedField) -> Option<&str> {
        match field {
            TrackedField::HostGroups => self.hostgroups.as_deref(),
            TrackedField::GlobalCoverage => self.bssglobalcoverage.as_deref(),
            TrackedField::HwFamily => self.bsshwfamily.as_deref(),
            TrackedField::LifecycleStatus => self.bsslifecyclestatus.as_deref(),
        }
    }

    pub fn set(&mut self, field: TrackedField, value: Option<String>) {
        match field {
            TrackedField::HostGroups => self.hostgroups = value,
            TrackedField::GlobalCoverage => self.bssglobalcoverage = value,
            TrackedField::HwFamily => self.bsshwfamily = value,
            TrackedField::LifecycleStatus => self.bsslifecyclestatus = value,
        }
    }

    /// Champs dont la valeur de `incoming` diffère de `self`, avec leur nouvelle valeur
    pub fn changes(&self, incoming: &TrackedAttributes) -> BTreeMap<TrackedField, Option<String>> {
        TrackedField::ALL
            .iter()
            .filter(|f| self.get(**f) != incoming.get(**f))
            .map(|f| (*f, incoming.get(*f).map(str::to_string)))
            .collect()
    }
}

// ===== Payloads entrants =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostPayload {
    #[serde(default)]
    pub id: Value,
    pub sitename: String,
    pub hostname: String,
    #[serde(default)]
    pub decommissioned: bool,
    #[serde(default)]
    pub host_groups: Value,
    #[serde(default)]
    pub bss_global_coverage: Option<Value>,
    #[serde(default)]
    pub bss_hw_family: Option<Value>,
    #[serde(default)]
    pub bss_lifecycle_status: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// Host validé, prêt à être comparé au store
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedHost {
    pub key: HostKey,
    pub id: String,
    pub sitename: String,
    pub hostname: String,
    pub decommissioned: bool,
    pub attributes: TrackedAttributes,
    pub point: Point,
    pub timestamp: i64,
}

impl HostPayload {
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::Decode(e.to_string()))
    }

    pub fn key(&self) -> HostKey {
        HostKey::new(&self.sitename, &self.hostname)
    }

    pub fn normalize(&self) -> Result<NormalizedHost, ValidationError> {
        let x = coordinate(self.longitude.as_ref(), "longitude")?;
        let y = coordinate(self.latitude.as_ref(), "latitude")?;
        let bss = extract_bss(
            self.bss_global_coverage.as_ref(),
            self.bss_hw_family.as_ref(),
            self.bss_lifecycle_status.as_ref(),
        )?;
        let timestamp = self
            .timestamp
            .as_ref()
            .ok_or(ValidationError::MissingField("timestamp"))
            .and_then(parse_timestamp_ms)?;

        Ok(NormalizedHost {
            key: self.key(),
            id: text_of(&self.id).unwrap_or_else(|| self.key().to_string()),
            sitename: self.sitename.clone(),
            hostname: self.hostname.clone(),
            decommissioned: self.decommissioned,
            attributes: TrackedAttributes {
                hostgroups: host_groups(&self.host_groups),
                bssglobalcoverage: bss.global_coverage,
                bsshwfamily: bss.hw_family,
                bsslifecyclestatus: bss.lifecycle_status,
            },
            point: Point { x, y },
            timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub id: Value,
    pub sitename: String,
    pub hostname: String,
    #[serde(default)]
    pub service_description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub state_type: Option<Value>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub long_output: Option<String>,
    #[serde(default)]
    pub event_state: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub key: EventKey,
    pub host_key: HostKey,
    pub id: String,
    pub sitename: String,
    pub hostname: String,
    pub service: String,
    pub kind: String,
    pub statetype: Value,
    pub output: String,
    pub longoutput: String,
    pub eventstate: i64,
    pub timestamp: i64,
}

impl EventPayload {
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::Decode(e.to_string()))
    }

    pub fn host_key(&self) -> HostKey {
        HostKey::new(&self.sitename, &self.hostname)
    }

    pub fn normalize(&self) -> Result<NormalizedEvent, ValidationError> {
        let timestamp = self
            .timestamp
            .as_ref()
            .ok_or(ValidationError::MissingField("timestamp"))
            .and_then(parse_timestamp_ms)?;
        let service = self
            .service_description
            .clone()
            .ok_or(ValidationError::MissingField("service_description"))?;
        let eventstate = self
            .event_state
            .as_ref()
            .ok_or(ValidationError::MissingField("event_state"))
            .and_then(severity)?;

        Ok(NormalizedEvent {
            key: EventKey::new(&self.sitename, &self.hostname, &service),
            host_key: self.host_key(),
            id: text_of(&self.id).ok_or(ValidationError::MissingField("id"))?,
            sitename: self.sitename.clone(),
            hostname: self.hostname.clone(),
            service,
            kind: self.kind.clone().ok_or(ValidationError::MissingField("type"))?,
            statetype: self
                .state_type
                .clone()
                .ok_or(ValidationError::MissingField("state_type"))?,
            output: self.output.clone().ok_or(ValidationError::MissingField("output"))?,
            longoutput: self
                .long_output
                .clone()
                .ok_or(ValidationError::MissingField("long_output"))?,
            eventstate,
            timestamp,
        })
    }
}

// ===== Enregistrements du store =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLifecycle {
    Absent,
    Active,
    Decommissioned,
}

impl HostLifecycle {
    pub fn of(record: Option<&HostRecord>) -> Self {
        match record {
            None => HostLifecycle::Absent,
            Some(r) if r.decommissioned || r.endtime.is_some() => HostLifecycle::Decommissioned,
            Some(_) => HostLifecycle::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: String,
    pub sitename: String,
    pub hostname: String,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(flatten)]
    pub attributes: TrackedAttributes,
    pub status: i64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub giskleur: i64,
    pub event_output: String,
    pub starttime: i64,
    #[serde(default)]
    pub endtime: Option<i64>,
    #[serde(rename = "objectId", default)]
    pub object_id: Option<i64>,
    #[serde(default)]
    pub decommissioned: bool,
    #[serde(default)]
    pub generation: u32,
}

impl HostRecord {
    /// Premier enregistrement d'un host : statut OK, type HOST.
    pub fn initial(host: &NormalizedHost, initial_output: &str, generation: u32) -> Self {
        Self {
            id: host.id.clone(),
            sitename: host.sitename.clone(),
            hostname: host.hostname.clone(),
            longitude: host.point.x,
            latitude: host.point.y,
            attributes: host.attributes.clone(),
            status: 0,
            kind: EventKind::Host,
            giskleur: 0,
            event_output: initial_output.to_string(),
            starttime: host.timestamp,
            endtime: None,
            object_id: None,
            decommissioned: false,
            generation,
        }
    }

    pub fn key(&self) -> HostKey {
        HostKey::new(&self.sitename, &self.hostname)
    }

    pub fn point(&self) -> Point {
        Point { x: self.longitude, y: self.latitude }
    }

    pub fn lifecycle(&self) -> HostLifecycle {
        HostLifecycle::of(Some(self))
    }

    /// Attributs complets d'une feature host (création)
    pub fn feature_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("sitename".into(), Value::from(self.sitename.clone()));
        attrs.insert("hostname".into(), Value::from(self.hostname.clone()));
        for field in TrackedField::ALL {
            attrs.insert(field.remote_name().into(), opt_text(self.attributes.get(field)));
        }
        attrs.insert("giskleur".into(), Value::from(self.giskleur));
        attrs.insert("status".into(), Value::from(self.status));
        attrs.insert("type".into(), Value::from(self.kind.as_str()));
        attrs.insert("event_output".into(), Value::from(self.event_output.clone()));
        attrs.insert("starttime".into(), Value::from(self.starttime));
        attrs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub sitename: String,
    pub hostname: String,
    pub servicedescription: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub statetype: Value,
    pub output: String,
    pub longoutput: String,
    pub eventstate: i64,
    pub timestamp: i64,
    #[serde(rename = "objectId", default)]
    pub object_id: Option<i64>,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub endtime: Option<i64>,
}

impl EventRecord {
    pub fn from_event(event: &NormalizedEvent) -> Self {
        Self {
            id: event.id.clone(),
            sitename: event.sitename.clone(),
            hostname: event.hostname.clone(),
            servicedescription: event.service.clone(),
            kind: event.kind.clone(),
            statetype: event.statetype.clone(),
            output: event.output.clone(),
            longoutput: event.longoutput.clone(),
            eventstate: event.eventstate,
            timestamp: event.timestamp,
            object_id: None,
            layer: None,
            endtime: None,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(&self.sitename, &self.hostname, &self.servicedescription)
    }

    pub fn host_key(&self) -> HostKey {
        HostKey::new(&self.sitename, &self.hostname)
    }

    pub fn is_host_level(&self) -> bool {
        self.servicedescription.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.endtime.is_none()
    }

    pub fn feature_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("sitename".into(), Value::from(self.sitename.clone()));
        attrs.insert("hostname".into(), Value::from(self.hostname.clone()));
        attrs.insert("servicedescription".into(), Value::from(self.servicedescription.clone()));
        attrs.insert("type".into(), Value::from(self.kind.clone()));
        attrs.insert("statetype".into(), self.statetype.clone());
        attrs.insert("eventstate".into(), Value::from(self.eventstate));
        attrs.insert("output".into(), Value::from(self.output.clone()));
        attrs.insert("longoutput".into(), Value::from(self.longoutput.clone()));
        attrs.insert("starttime".into(), Value::from(self.timestamp));
        attrs
    }
}

// ===== Normalisation =====

/// Valeur texte d'un champ JSON ; `null` donne `None`, les scalaires sont rendus en texte.
pub fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn opt_text(value: Option<&str>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn host_groups(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(text_of).collect::<Vec<_>>().join(",")),
        other => text_of(other),
    }
}

fn coordinate(field: Option<&Value>, name: &'static str) -> Result<f64, ValidationError> {
    let raw = field
        .and_then(|f| f.get("value"))
        .filter(|v| !v.is_null())
        .ok_or(ValidationError::MissingGeometry(name))?;

    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::InvalidCoordinate { field: name, value: raw.to_string() })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssValues {
    pub global_coverage: Option<String>,
    pub hw_family: Option<String>,
    pub lifecycle_status: Option<String>,
}

/// Extraction en deux branches : `realvalue` si les trois champs le portent,
/// sinon `value` si les trois le portent. Jamais de mélange entre formes.
pub fn extract_bss(
    global_coverage: Option<&Value>,
    hw_family: Option<&Value>,
    lifecycle_status: Option<&Value>,
) -> Result<BssValues, ValidationError> {
    let fields = [global_coverage, hw_family, lifecycle_status];

    for branch in ["realvalue", "value"] {
        let picked: Option<Vec<Option<String>>> = fields
            .iter()
            .map(|f| f.and_then(|v| v.get(branch)).map(text_of))
            .collect();

        if let Some(mut values) = picked {
            let lifecycle_status = values.pop().flatten();
            let hw_family = values.pop().flatten();
            let global_coverage = values.pop().flatten();
            return Ok(BssValues { global_coverage, hw_family, lifecycle_status });
        }
    }

    Err(ValidationError::BssShape)
}

/// Convertit un timestamp du flux en epoch millisecondes.
///
/// Accepte un entier (déjà en ms), du texte RFC 3339 / ISO 8601, ou un
/// ISO 8601 sans décalage (interprété en UTC).
pub fn parse_timestamp_ms(value: &Value) -> Result<i64, ValidationError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .ok_or_else(|| ValidationError::Timestamp(n.to_string())),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return Ok(ms);
            }
            let parsed = OffsetDateTime::parse(s, &Rfc3339)
                .or_else(|_| OffsetDateTime::parse(s, &Iso8601::DEFAULT))
                .or_else(|_| PrimitiveDateTime::parse(s, &Iso8601::DEFAULT).map(|p| p.assume_utc()))
                .map_err(|_| ValidationError::Timestamp(s.to_string()))?;
            Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
        }
        other => Err(ValidationError::Timestamp(other.to_string())),
    }
}

fn severity(value: &Value) -> Result<i64, ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .filter(|s| *s >= 0)
        .ok_or_else(|| ValidationError::Severity(value.to_string()))
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host_json() -> Value {
        json!({
            "id": "AMS_router-01",
            "sitename": "AMS",
            "hostname": "router-01",
            "decommissioned": false,
            "host_groups": ["core", "wan"],
            "bss_global_coverage": {"realvalue": "NL", "value": "nl"},
            "bss_hw_family": {"realvalue": "ASR", "value": "asr"},
            "bss_lifecycle_status": {"realvalue": "LIVE", "value": "live"},
            "longitude": {"value": 4.89},
            "latitude": {"value": "52.37"},
            "timestamp": "2021-03-04T10:00:00Z"
        })
    }

    #[test]
    fn test_keys() {
        assert_eq!(HostKey::new("AMS", "r1").as_str(), "AMS_r1");
        assert_eq!(EventKey::new("AMS", "r1", "").as_str(), "AMS_r1_");
        assert_eq!(EventKey::new("AMS", "r1", "disk /var").as_str(), "AMS_r1_disk var");
        assert_eq!(HostKey::new("AMS", "r1").archived(2), "AMS_r1@2");
    }

    #[test]
    fn test_normalize_host_prefers_realvalue() {
        let host = HostPayload::from_value(host_json()).unwrap().normalize().unwrap();
        assert_eq!(host.attributes.bssglobalcoverage.as_deref(), Some("NL"));
        assert_eq!(host.attributes.bsshwfamily.as_deref(), Some("ASR"));
        assert_eq!(host.attributes.hostgroups.as_deref(), Some("core,wan"));
        assert_eq!(host.point, Point { x: 4.89, y: 52.37 });
        assert_eq!(host.timestamp, 1_614_852_000_000);
    }

    #[test]
    fn test_bss_falls_back_wholesale_to_value() {
        // un seul champ sans realvalue : toute l'extraction bascule sur value
        let mut raw = host_json();
        raw["bss_hw_family"] = json!({"value": "asr"});
        let host = HostPayload::from_value(raw).unwrap().normalize().unwrap();
        assert_eq!(host.attributes.bssglobalcoverage.as_deref(), Some("nl"));
        assert_eq!(host.attributes.bsshwfamily.as_deref(), Some("asr"));
        assert_eq!(host.attributes.bsslifecyclestatus.as_deref(), Some("live"));
    }

    #[test]
    fn test_bss_without_either_shape_is_rejected() {
        let mut raw = host_json();
        raw["bss_hw_family"] = json!({"realvalue": "ASR"});
        raw["bss_global_coverage"] = json!({"value": "nl"});
        let err = HostPayload::from_value(raw).unwrap().normalize().unwrap_err();
        assert_eq!(err, ValidationError::BssShape);
    }

    #[test]
    fn test_null_bss_value_is_kept_as_none() {
        let mut raw = host_json();
        raw["bss_hw_family"] = json!({"realvalue": null});
        let host = HostPayload::from_value(raw).unwrap().normalize().unwrap();
        assert_eq!(host.attributes.bsshwfamily, None);
    }

    #[test]
    fn test_null_geometry_is_rejected() {
        let mut raw = host_json();
        raw["latitude"] = json!({"value": null});
        let err = HostPayload::from_value(raw).unwrap().normalize().unwrap_err();
        assert_eq!(err, ValidationError::MissingGeometry("latitude"));

        let mut raw = host_json();
        raw.as_object_mut().unwrap().remove("longitude");
        let err = HostPayload::from_value(raw).unwrap().normalize().unwrap_err();
        assert_eq!(err, ValidationError::MissingGeometry("longitude"));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp_ms(&json!(1_614_852_000_000_i64)).unwrap(), 1_614_852_000_000);
        assert_eq!(parse_timestamp_ms(&json!("2021-03-04T10:00:00+01:00")).unwrap(), 1_614_848_400_000);
        assert_eq!(parse_timestamp_ms(&json!("2021-03-04T10:00:00.250Z")).unwrap(), 1_614_852_000_250);
        assert_eq!(parse_timestamp_ms(&json!("2021-03-04T10:00:00")).unwrap(), 1_614_852_000_000);
        assert!(parse_timestamp_ms(&json!("yesterday")).is_err());
        assert!(parse_timestamp_ms(&json!(null)).is_err());
    }

    #[test]
    fn test_normalize_event() {
        let raw = json!({
            "id": 42,
            "sitename": "AMS",
            "hostname": "r1",
            "service_description": "cpu",
            "type": "SERVICE",
            "state_type": "HARD",
            "output": "CPU 97%",
            "long_output": "",
            "event_state": "2",
            "timestamp": "2021-03-04T10:00:00Z"
        });
        let ev = EventPayload::from_value(raw).unwrap().normalize().unwrap();
        assert_eq!(ev.id, "42");
        assert_eq!(ev.eventstate, 2);
        assert_eq!(ev.key.as_str(), "AMS_r1_cpu");
        assert_eq!(ev.host_key.as_str(), "AMS_r1");
    }

    #[test]
    fn test_changes_lists_only_differing_fields() {
        let stored = TrackedAttributes {
            hostgroups: Some("core".into()),
            bssglobalcoverage: Some("NL".into()),
            bsshwfamily: Some("ASR".into()),
            bsslifecyclestatus: Some("LIVE".into()),
        };
        let mut incoming = stored.clone();
        incoming.bsshwfamily = Some("NCS".into());

        let changes = stored.changes(&incoming);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get(&TrackedField::HwFamily), Some(&Some("NCS".to_string())));
        assert!(stored.changes(&stored).is_empty());
    }

    #[test]
    fn test_giskleur() {
        assert_eq!(giskleur(2, EventKind::Host), 2);
        assert_eq!(giskleur(2, EventKind::Service), 11);
    }
}
