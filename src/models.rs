use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::invariants;
use crate::revision::CompositeRevision;

/// Changelog message recorded in front of an amended commit.
pub const REPLACEMENT_MESSAGE: &str = "--- previous change overwritten ---";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TwigletId(pub Uuid);

impl TwigletId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TwigletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TwigletId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for TwigletId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub attrs: Vec<Attribute>,
    /// Client-owned fields the service does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association: Option<String>,
    #[serde(default)]
    pub attrs: Vec<Attribute>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub message: String,
    pub user: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub replacement: bool,
}

impl CommitEntry {
    pub fn new(message: impl Into<String>, user: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            user: user.into(),
            timestamp: at,
            replacement: false,
        }
    }

    pub fn replacement_marker(user: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            message: REPLACEMENT_MESSAGE.to_string(),
            user: user.into(),
            timestamp: at,
            replacement: true,
        }
    }
}

/// Body of a twiglet's lookup document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwigletInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Twiglet {
    pub id: TwigletId,
    pub name: String,
    pub description: String,
    pub revision: CompositeRevision,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_commit: Option<CommitEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwigletSummary {
    pub id: TwigletId,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Changelog {
    pub changelog: Vec<CommitEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAttribute {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntity {
    #[serde(default)]
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: Vec<ModelAttribute>,
}

pub type ModelEntities = BTreeMap<String, ModelEntity>;

/// Body of an organisation model document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    #[serde(default)]
    pub entities: ModelEntities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgModel {
    pub name: String,
    pub revision: String,
    pub entities: ModelEntities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgModelSummary {
    pub name: String,
}

/// A twiglet's private copy of the model it was created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwigletModel {
    pub revision: String,
    pub entities: ModelEntities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Map<String, Value>,
    #[serde(default)]
    pub links: Map<String, Value>,
    #[serde(default)]
    pub user_state: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewSummary {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTwigletPayload {
    pub name: String,
    pub description: Option<String>,
    /// Organisation model to snapshot into the new twiglet.
    pub model: Option<String>,
    /// Existing twiglet whose nodes, links and model are copied.
    pub clone_twiglet: Option<String>,
    pub commit_message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTwigletPayload {
    pub name: String,
    pub description: Option<String>,
    pub revision: String,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    pub commit_message: String,
    #[serde(default)]
    pub do_replacement: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTwigletPayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub revision: String,
    pub nodes: Option<Vec<Node>>,
    pub links: Option<Vec<Link>>,
    pub commit_message: String,
    #[serde(default)]
    pub do_replacement: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateModelPayload {
    pub name: String,
    #[serde(default)]
    pub entities: ModelEntities,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateModelPayload {
    pub name: Option<String>,
    pub revision: String,
    pub entities: ModelEntities,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTwigletModelPayload {
    pub revision: String,
    pub entities: ModelEntities,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPayload {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Map<String, Value>,
    #[serde(default)]
    pub links: Map<String, Value>,
    #[serde(default)]
    pub user_state: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventPayload {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequencePayload {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Validated replacement for a twiglet's info, nodes and links.
#[derive(Debug, Clone)]
pub struct TwigletDefinition {
    pub revision: CompositeRevision,
    pub name: String,
    pub description: String,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    pub commit_message: String,
    pub do_replacement: bool,
}

impl UpdateTwigletPayload {
    /// Validates without touching the store. A malformed revision is
    /// reported ahead of any other problem with the payload.
    pub fn normalize(self) -> Result<TwigletDefinition> {
        let revision = CompositeRevision::parse(&self.revision)?;
        let name = required_name(&self.name, "Twiglet name is required")?;
        let commit_message = required_commit_message(&self.commit_message)?;
        invariants::ensure_twiglet_invariants(&self.nodes, &self.links)?;

        Ok(TwigletDefinition {
            revision,
            name,
            description: self.description.unwrap_or_default(),
            nodes: self.nodes,
            links: self.links,
            commit_message,
            do_replacement: self.do_replacement,
        })
    }
}

impl PatchTwigletPayload {
    /// Fills fields the client left out from `current`.
    pub fn merge_onto(self, current: &Twiglet) -> UpdateTwigletPayload {
        UpdateTwigletPayload {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            description: Some(
                self.description
                    .unwrap_or_else(|| current.description.clone()),
            ),
            revision: self.revision,
            nodes: self.nodes.unwrap_or_else(|| current.nodes.clone()),
            links: self.links.unwrap_or_else(|| current.links.clone()),
            commit_message: self.commit_message,
            do_replacement: self.do_replacement,
        }
    }
}

impl CreateTwigletPayload {
    pub fn normalize(self) -> Result<CreateTwigletPayload> {
        let name = required_name(&self.name, "Twiglet name is required")?;
        let commit_message = required_commit_message(&self.commit_message)?;
        if self.model.is_some() && self.clone_twiglet.is_some() {
            return Err(LibError::invalid(
                "Choose either a model or a twiglet to clone, not both",
                anyhow!("create payload for {} named both model and clone source", name),
            ));
        }
        Ok(CreateTwigletPayload {
            name,
            commit_message,
            ..self
        })
    }
}

impl ViewPayload {
    pub fn into_view(self) -> Result<View> {
        Ok(View {
            name: required_name(&self.name, "View name is required")?,
            description: self.description.unwrap_or_default(),
            nodes: self.nodes,
            links: self.links,
            user_state: self.user_state,
        })
    }
}

pub(crate) fn required_name(raw: &str, public: &'static str) -> Result<String> {
    let name = raw.trim().to_string();
    if name.is_empty() {
        return Err(LibError::invalid(public, anyhow!("empty name")));
    }
    Ok(name)
}

fn required_commit_message(raw: &str) -> Result<String> {
    let message = raw.trim().to_string();
    if message.is_empty() {
        return Err(LibError::invalid_with_code(
            "commit_message_required",
            "A commit message is required",
            anyhow!("empty commit message"),
        ));
    }
    Ok(message)
}
