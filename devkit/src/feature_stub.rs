/*!
FeatureService simulé pour tests sans FeatureServer

Enregistre tous les appels (add / update / delete / query) et permet de
scripter des refus (`success: false`) ou des erreurs de transport.
Les objectIds sont attribués séquentiellement à partir de 1.
*/

use async_trait::async_trait;
use gismirror_kernel::featureservice::{Attributes, EditResult, FeatureError, FeatureService};
use gismirror_kernel::models::{Point, OBJECT_ID_FIELD};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Update,
    Delete,
    Query,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureCall {
    Add { layer: String, point: Point, attributes: Attributes },
    /// `point` absent pour une mise à jour d'attributs seuls
    Update { layer: String, point: Option<Point>, attributes: Attributes },
    Delete { layer: String, object_id: i64 },
    Query { layer: String },
}

impl FeatureCall {
    pub fn op(&self) -> Op {
        match self {
            FeatureCall::Add { .. } => Op::Add,
            FeatureCall::Update { .. } => Op::Update,
            FeatureCall::Delete { .. } => Op::Delete,
            FeatureCall::Query { .. } => Op::Query,
        }
    }

    pub fn layer(&self) -> &str {
        match self {
            FeatureCall::Add { layer, .. }
            | FeatureCall::Update { layer, .. }
            | FeatureCall::Delete { layer, .. }
            | FeatureCall::Query { layer } => layer,
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            FeatureCall::Add { attributes, .. } | FeatureCall::Update { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    /// objectId visé par un update / delete
    pub fn target_object_id(&self) -> Option<i64> {
        match self {
            FeatureCall::Update { attributes, .. } => attributes.get(OBJECT_ID_FIELD).and_then(Value::as_i64),
            FeatureCall::Delete { object_id, .. } => Some(*object_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailMode {
    Refuse,
    Error,
}

#[derive(Default)]
struct Script {
    next_object_id: i64,
    /// Échecs à consommer, par opération, dans l'ordre
    next_failures: HashMap<Op, Vec<FailMode>>,
    /// updates refusés pour ces objectIds (permanent)
    refused_targets: Vec<i64>,
    open_features: HashMap<String, Vec<i64>>,
}

/// Mock de `FeatureService`
#[derive(Clone)]
pub struct MockFeatureService {
    calls: Arc<Mutex<Vec<FeatureCall>>>,
    script: Arc<Mutex<Script>>,
}

impl MockFeatureService {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Premier objectId attribué par `add`
    pub fn starting_at(first_object_id: i64) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(Script { next_object_id: first_object_id, ..Script::default() })),
        }
    }

    /// Le prochain appel `op` répond `success: false`
    pub fn refuse_next(&self, op: Op) -> &Self {
        self.script.lock().unwrap().next_failures.entry(op).or_default().push(FailMode::Refuse);
        self
    }

    /// Le prochain appel `op` échoue au niveau transport
    pub fn error_next(&self, op: Op) -> &Self {
        self.script.lock().unwrap().next_failures.entry(op).or_default().push(FailMode::Error);
        self
    }

    /// Tout update visant `object_id` est refusé
    pub fn refuse_updates_of(&self, object_id: i64) -> &Self {
        self.script.lock().unwrap().refused_targets.push(object_id);
        self
    }

    /// Features ouvertes renvoyées par `open_object_ids`
    pub fn set_open_features(&self, layer: &str, object_ids: Vec<i64>) -> &Self {
        self.script.lock().unwrap().open_features.insert(layer.to_string(), object_ids);
        self
    }

    /// Récupère tous les appels (pour assertions de tests)
    pub fn calls(&self) -> Vec<FeatureCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, op: Op) -> Vec<FeatureCall> {
        self.calls().into_iter().filter(|c| c.op() == op).collect()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls_of(op).len()
    }

    /// Nombre d'appels de mutation (add / update / delete)
    pub fn mutation_count(&self) -> usize {
        self.calls().iter().filter(|c| c.op() != Op::Query).count()
    }

    /// Reset les appels enregistrés (le script est conservé)
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: FeatureCall) -> Result<Option<FailMode>, FeatureError> {
        let op = call.op();
        let target = call.target_object_id();
        self.calls.lock().unwrap().push(call);

        let mut script = self.script.lock().unwrap();
        let scripted = script.next_failures.get_mut(&op).and_then(|queue| {
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        });
        let refused_target = op == Op::Update && target.is_some_and(|t| script.refused_targets.contains(&t));

        match scripted {
            Some(FailMode::Error) => Err(FeatureError::Remote(format!("scripted {op:?} error"))),
            Some(FailMode::Refuse) => Ok(Some(FailMode::Refuse)),
            None if refused_target => Ok(Some(FailMode::Refuse)),
            None => Ok(None),
        }
    }

    fn edit(&self, call: FeatureCall) -> Result<EditResult, FeatureError> {
        let op = call.op();
        let target = call.target_object_id();
        if self.record(call)?.is_some() {
            log::info!("[MOCK] {op:?} refused");
            return Ok(EditResult::failed(format!("scripted {op:?} refusal")));
        }

        let object_id = match op {
            Op::Add => {
                let mut script = self.script.lock().unwrap();
                let id = script.next_object_id;
                script.next_object_id += 1;
                Some(id)
            }
            _ => target,
        };
        log::info!("[MOCK] {op:?} ok (objectId {object_id:?})");
        Ok(EditResult::ok(object_id))
    }
}

impl Default for MockFeatureService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureService for MockFeatureService {
    async fn add(&self, point: Point, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        self.edit(FeatureCall::Add { layer: layer.to_string(), point, attributes })
    }

    async fn update(&self, point: Point, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        self.edit(FeatureCall::Update { layer: layer.to_string(), point: Some(point), attributes })
    }

    async fn update_attributes(&self, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        self.edit(FeatureCall::Update { layer: layer.to_string(), point: None, attributes })
    }

    async fn delete(&self, object_id: i64, layer: &str) -> Result<EditResult, FeatureError> {
        self.edit(FeatureCall::Delete { layer: layer.to_string(), object_id })
    }

    async fn open_object_ids(&self, layer: &str) -> Result<Vec<i64>, FeatureError> {
        self.record(FeatureCall::Query { layer: layer.to_string() })?;
        Ok(self.script.lock().unwrap().open_features.get(layer).cloned().unwrap_or_default())
    }
}
