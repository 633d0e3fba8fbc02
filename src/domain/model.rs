use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::LifecycleError;

pub const DEFAULT_CONTAINER_PORT: u16 = 8000;
pub const DEFAULT_BRANCH: &str = "main";

/// Backend-assigned identifier. The backend may send it as a number or a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for AppId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AppId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(id) => AppId(id.to_string()),
            RawId::Text(id) => AppId(id),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Imported,
    Preparing,
    Prepared,
    Deploying,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AppStatus::Imported => "imported",
            AppStatus::Preparing => "preparing",
            AppStatus::Prepared => "prepared",
            AppStatus::Deploying => "deploying",
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
            AppStatus::Failed => "failed",
        })
    }
}

/// Progressive-disclosure step of the import / prepare / deploy workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Import = 1,
    Prepare = 2,
    Deploy = 3,
}

impl Step {
    /// A failed application sits on the step that failed: prepare if a routing
    /// rule survived, import otherwise.
    pub fn of(status: AppStatus, has_rule: bool) -> Step {
        match status {
            AppStatus::Imported | AppStatus::Preparing => Step::Import,
            AppStatus::Prepared => Step::Prepare,
            AppStatus::Deploying | AppStatus::Running | AppStatus::Stopped => Step::Deploy,
            AppStatus::Failed if has_rule => Step::Prepare,
            AppStatus::Failed => Step::Import,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }
}

/// User-facing actions offered by the action surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Prepare,
    Deploy,
    Redeploy,
    Stop,
    ViewLogs,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Prepare => "prepare",
            Action::Deploy => "deploy",
            Action::Redeploy => "redeploy",
            Action::Stop => "stop",
            Action::ViewLogs => "view logs of",
            Action::Delete => "delete",
        })
    }
}

/// Lifecycle operations that take ownership of an application while in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Prepare,
    Deploy,
    Stop,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Prepare => "prepare",
            Operation::Deploy => "deploy",
            Operation::Stop => "stop",
            Operation::Delete => "delete",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ApplicationRecord")]
pub struct Application {
    pub id: AppId,
    pub name: String,
    pub slug: String,
    pub git_url: String,
    pub branch: String,
    pub status: AppStatus,
    pub traefik_rule: Option<String>,
    pub container_port: u16,
    pub env_vars: BTreeMap<String, String>,
    pub error_message: Option<String>,
}

impl Application {
    pub fn slug_for(name: &str) -> String {
        name.to_lowercase().replace([' ', '_'], "-")
    }

    pub fn step(&self) -> Step {
        Step::of(self.status, self.traefik_rule.is_some())
    }

    /// Whether `action` is a legal edge from the current state.
    pub fn allows(&self, action: Action) -> bool {
        let has_rule = self.traefik_rule.is_some();
        match action {
            Action::Prepare => match self.status {
                AppStatus::Imported => true,
                AppStatus::Failed => !has_rule,
                _ => false,
            },
            Action::Deploy => match self.status {
                AppStatus::Prepared | AppStatus::Stopped | AppStatus::Running => true,
                AppStatus::Failed => has_rule,
                _ => false,
            },
            Action::Redeploy | Action::Stop => self.status == AppStatus::Running,
            Action::ViewLogs => self.step() >= Step::Prepare,
            Action::Delete => true,
        }
    }

    /// Actions to offer for the current state; a running application offers
    /// `redeploy` rather than `deploy`.
    pub fn available_actions(&self) -> Vec<Action> {
        [
            Action::Prepare,
            Action::Deploy,
            Action::Redeploy,
            Action::Stop,
            Action::ViewLogs,
            Action::Delete,
        ]
        .into_iter()
        .filter(|action| match action {
            Action::Deploy => self.status != AppStatus::Running && self.allows(*action),
            _ => self.allows(*action),
        })
        .collect()
    }

    pub fn deploy_config(&self) -> DeployConfig {
        DeployConfig {
            container_port: self.container_port,
            env_vars: self.env_vars.clone(),
        }
    }
}

/// Wire shape of an application. The backend sends empty strings for unset
/// optional fields and may omit `slug`.
#[derive(Deserialize)]
struct ApplicationRecord {
    id: AppId,
    name: String,
    #[serde(default)]
    slug: Option<String>,
    git_url: String,
    #[serde(default)]
    branch: Option<String>,
    status: AppStatus,
    #[serde(default)]
    traefik_rule: Option<String>,
    #[serde(default)]
    container_port: Option<u16>,
    #[serde(default)]
    env_vars: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    error_message: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl From<ApplicationRecord> for Application {
    fn from(record: ApplicationRecord) -> Self {
        let slug = non_empty(record.slug).unwrap_or_else(|| Application::slug_for(&record.name));
        let env_vars = record
            .env_vars
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(value) => (key, value),
                other => (key, other.to_string()),
            })
            .collect();
        Application {
            id: record.id,
            name: record.name,
            slug,
            git_url: record.git_url,
            branch: non_empty(record.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            status: record.status,
            traefik_rule: non_empty(record.traefik_rule),
            container_port: record
                .container_port
                .filter(|port| *port > 0)
                .unwrap_or(DEFAULT_CONTAINER_PORT),
            env_vars,
            error_message: non_empty(record.error_message),
        }
    }
}

/// Payload of an import request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApplication {
    pub name: String,
    pub git_url: String,
    #[serde(default)]
    pub branch: String,
}

impl NewApplication {
    pub fn new(name: impl Into<String>, git_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            git_url: git_url.into(),
            branch: branch.into(),
        }
    }

    /// Trims every field, defaults the branch and rejects missing fields.
    pub fn normalized(self) -> Result<Self, LifecycleError> {
        let name = self.name.trim().to_string();
        let git_url = self.git_url.trim().to_string();
        if name.is_empty() {
            return Err(LifecycleError::Validation("App name is required".to_string()));
        }
        if git_url.is_empty() {
            return Err(LifecycleError::Validation("Git URL is required".to_string()));
        }
        let branch = match self.branch.trim() {
            "" => DEFAULT_BRANCH.to_string(),
            branch => branch.to_string(),
        };
        Ok(Self { name, git_url, branch })
    }
}

/// Container settings persisted right before a deploy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

fn default_container_port() -> u16 {
    DEFAULT_CONTAINER_PORT
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            container_port: DEFAULT_CONTAINER_PORT,
            env_vars: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PrepareReceipt {
    #[serde(default)]
    pub traefik_rule: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct DeployReceipt {
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LoginReceipt {
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
}
