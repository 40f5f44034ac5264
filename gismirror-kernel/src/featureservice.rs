/**
 * FEATURE SERVICE - Client de la couche SIG distante
 *
 * RÔLE :
 * Enveloppe sans état des opérations add / update / delete d'un
 * FeatureServer ArcGIS, plus la requête des features ouvertes utilisée par
 * le balayage des orphelins. Aucune interprétation métier ici.
 *
 * FONCTIONNEMENT :
 * - Une seule primitive de transport : token, puis POST formulaire
 *   `{adds|updates|deletes, f=json, token}` sur `{service_url}/{layer}/applyEdits`
 * - Le premier élément de `addResults|updateResults|deleteResults` est rendu
 *   tel quel dans un `EditResult`
 * - Corps illisible ou erreur de premier niveau = `FeatureError`
 * - Nouvelle tentative (backoff exponentiel) uniquement si la connexion
 *   n'a pas pu être établie
 */

use crate::models::{Point, OBJECT_ID_FIELD};
use crate::token::{TokenError, TokenProvider};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub type Attributes = Map<String, Value>;

/// Référence spatiale WGS84 des géométries envoyées
pub const WKID: i64 = 4326;

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("token unavailable: {0}")]
    Token(#[from] TokenError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("undecodable response (HTTP {status}): {message}")]
    Decode { status: u16, message: String },
    #[error("feature service error: {0}")]
    Remote(String),
    #[error("response carries no {0}")]
    EmptyResult(&'static str),
    #[error("update attributes must carry `{}`", OBJECT_ID_FIELD)]
    MissingObjectId,
}

/// Résultat uniforme d'une édition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditResult {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "objectId", default)]
    pub object_id: Option<i64>,
    #[serde(default, deserialize_with = "error_text")]
    pub error: Option<String>,
}

impl EditResult {
    pub fn ok(object_id: Option<i64>) -> Self {
        Self { success: true, object_id, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, object_id: None, error: Some(message.into()) }
    }
}

/// `{"code": 1000, "description": "..."}` devient `"1000: ..."`
fn error_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| describe_error(&v)))
}

fn describe_error(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            let code = obj.get("code").map(|c| c.to_string());
            let text = obj
                .get("description")
                .or_else(|| obj.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string);
            match (code, text) {
                (Some(code), Some(text)) => Some(format!("{code}: {text}")),
                (None, Some(text)) => Some(text),
                (Some(code), None) => Some(code),
                (None, None) => Some(value.to_string()),
            }
        }
        other => Some(other.to_string()),
    }
}

#[async_trait]
pub trait FeatureService: Send + Sync {
    async fn add(&self, point: Point, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError>;

    /// `attributes` doit contenir `objectid`
    async fn update(&self, point: Point, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError>;

    /// Mise à jour sans géométrie (la position de la feature est conservée)
    async fn update_attributes(&self, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError>;

    async fn delete(&self, object_id: i64, layer: &str) -> Result<EditResult, FeatureError>;

    /// objectIds des features sans `endtime`
    async fn open_object_ids(&self, layer: &str) -> Result<Vec<i64>, FeatureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditKind {
    Add,
    Update,
    Delete,
}

impl EditKind {
    fn form_field(self) -> &'static str {
        match self {
            EditKind::Add => "adds",
            EditKind::Update => "updates",
            EditKind::Delete => "deletes",
        }
    }

    fn result_field(self) -> &'static str {
        match self {
            EditKind::Add => "addResults",
            EditKind::Update => "updateResults",
            EditKind::Delete => "deleteResults",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApplyEditsResponse {
    #[serde(rename = "addResults", default)]
    add_results: Vec<EditResult>,
    #[serde(rename = "updateResults", default)]
    update_results: Vec<EditResult>,
    #[serde(rename = "deleteResults", default)]
    delete_results: Vec<EditResult>,
    #[serde(default)]
    error: Option<Value>,
}

impl ApplyEditsResponse {
    fn into_results(self, kind: EditKind) -> Vec<EditResult> {
        match kind {
            EditKind::Add => self.add_results,
            EditKind::Update => self.update_results,
            EditKind::Delete => self.delete_results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryIdsResponse {
    #[serde(rename = "objectIds", default)]
    object_ids: Option<Vec<i64>>,
    #[serde(default)]
    error: Option<Value>,
}

/// Feature JSON : géométrie WGS84 + attributs
pub fn feature_json(point: Point, attributes: Attributes) -> Value {
    json!({
        "geometry": {"x": point.x, "y": point.y, "spatialReference": {"wkid": WKID}},
        "attributes": attributes,
    })
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, backoff: Duration::from_millis(200) }
    }
}

pub struct ArcGisFeatureClient {
    client: reqwest::Client,
    service_url: String,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl ArcGisFeatureClient {
    pub fn new(
        service_url: &str,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, FeatureError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            service_url: service_url.trim_end_matches('/').to_string(),
            tokens,
            retry,
        })
    }

    fn layer_url(&self, layer: &str, operation: &str) -> String {
        format!("{}/{}/{}", self.service_url, layer, operation)
    }

    /// POST formulaire, relancé uniquement sur échec d'établissement de connexion
    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<(u16, String), FeatureError> {
        let mut attempt = 0;
        loop {
            match self.client.post(url).form(form).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await?;
                    return Ok((status, body));
                }
                Err(e) if e.is_connect() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff * 2u32.saturating_pow(attempt);
                    warn!("connection to {url} failed (attempt {}): {e}; retrying in {:?}", attempt + 1, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn apply_edits(&self, kind: EditKind, edits: Value, layer: &str) -> Result<EditResult, FeatureError> {
        let token = self.tokens.token().await?;
        let url = self.layer_url(layer, "applyEdits");
        let form = [
            (kind.form_field(), edits.to_string()),
            ("f", "json".to_string()),
            ("token", token),
        ];

        debug!("applyEdits {} on layer {layer}", kind.form_field());
        let (status, body) = self.post_form(&url, &form).await?;
        let decoded: ApplyEditsResponse =
            serde_json::from_str(&body).map_err(|e| FeatureError::Decode { status, message: e.to_string() })?;

        if let Some(error) = decoded.error.as_ref().and_then(describe_error) {
            return Err(FeatureError::Remote(error));
        }
        decoded
            .into_results(kind)
            .into_iter()
            .next()
            .ok_or(FeatureError::EmptyResult(kind.result_field()))
    }
}

#[async_trait]
impl FeatureService for ArcGisFeatureClient {
    async fn add(&self, point: Point, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        self.apply_edits(EditKind::Add, json!([feature_json(point, attributes)]), layer).await
    }

    async fn update(&self, point: Point, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        if !attributes.contains_key(OBJECT_ID_FIELD) {
            return Err(FeatureError::MissingObjectId);
        }
        self.apply_edits(EditKind::Update, json!([feature_json(point, attributes)]), layer).await
    }

    async fn update_attributes(&self, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        if !attributes.contains_key(OBJECT_ID_FIELD) {
            return Err(FeatureError::MissingObjectId);
        }
        self.apply_edits(EditKind::Update, json!([{"attributes": attributes}]), layer).await
    }

    async fn delete(&self, object_id: i64, layer: &str) -> Result<EditResult, FeatureError> {
        self.apply_edits(EditKind::Delete, json!([object_id]), layer).await
    }

    async fn open_object_ids(&self, layer: &str) -> Result<Vec<i64>, FeatureError> {
        let token = self.tokens.token().await?;
        let url = self.layer_url(layer, "query");
        let form = [
            ("where", "endtime IS NULL".to_string()),
            ("returnIdsOnly", "true".to_string()),
            ("f", "json".to_string()),
            ("token", token),
        ];

        let (status, body) = self.post_form(&url, &form).await?;
        let decoded: QueryIdsResponse =
            serde_json::from_str(&body).map_err(|e| FeatureError::Decode { status, message: e.to_string() })?;
        if let Some(error) = decoded.error.as_ref().and_then(describe_error) {
            return Err(FeatureError::Remote(error));
        }
        Ok(decoded.object_ids.unwrap_or_default())
    }
}
