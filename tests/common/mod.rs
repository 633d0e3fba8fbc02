#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use keystone::{
    domain::{
        lifecycle::LifecycleController,
        model::{
            AppId, AppStatus, Application, DeployConfig, DeployReceipt, LoginReceipt,
            NewApplication, PrepareReceipt,
        },
        port::{Credential, DeploymentBackend, SharedBackend},
        Dashboard,
    },
    errors::BackendError,
    session::Session,
};
use tokio::sync::{Notify, Semaphore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Login(String),
    Logout,
    List,
    Import(NewApplication),
    Prepare(AppId),
    UpdateConfig(AppId, DeployConfig),
    Deploy(AppId),
    Stop(AppId),
    Logs(AppId),
    Delete(AppId),
}

/// Holds a backend request in flight until released.
pub struct Gate {
    entered: Notify,
    permits: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            permits: Semaphore::new(0),
        }
    }

    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Default)]
struct ServerState {
    apps: Vec<Application>,
    next_id: u64,
    failures: HashMap<&'static str, BackendError>,
    gates: HashMap<&'static str, Arc<Gate>>,
    logs: String,
    prepare_without_rule: bool,
}

/// In-memory stand-in for the deployment backend that records every call.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<ServerState>,
    calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, app: Application) {
        let mut state = self.state.lock().unwrap();
        state.apps.retain(|existing| existing.id != app.id);
        state.apps.push(app);
    }

    pub fn server_app(&self, id: &AppId) -> Option<Application> {
        self.state
            .lock()
            .unwrap()
            .apps
            .iter()
            .find(|app| &app.id == id)
            .cloned()
    }

    pub fn set_server_status(&self, id: &AppId, status: AppStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(app) = state.apps.iter_mut().find(|app| &app.id == id) {
            app.status = status;
        }
    }

    /// Removes an application behind the dashboard's back.
    pub fn forget(&self, id: &AppId) {
        self.state.lock().unwrap().apps.retain(|app| &app.id != id);
    }

    pub fn set_logs(&self, logs: &str) {
        self.state.lock().unwrap().logs = logs.to_string();
    }

    /// Makes `prepare` answer 2xx without a routing rule.
    pub fn omit_rule(&self) {
        self.state.lock().unwrap().prepare_without_rule = true;
    }

    pub fn fail(&self, operation: &'static str, error: BackendError) {
        self.state.lock().unwrap().failures.insert(operation, error);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().unwrap().failures.remove(operation);
    }

    pub fn hold(&self, operation: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(operation, gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    async fn enter(&self, operation: &'static str, call: Call) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(call);
        let gate = self.state.lock().unwrap().gates.get(operation).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        match self.state.lock().unwrap().failures.get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn update(&self, id: &AppId, f: impl FnOnce(&mut Application)) -> Result<Application, BackendError> {
        let mut state = self.state.lock().unwrap();
        let app = state
            .apps
            .iter_mut()
            .find(|app| &app.id == id)
            .ok_or(BackendError::Rejected {
                status: 404,
                message: "Not found.".to_string(),
            })?;
        f(app);
        Ok(app.clone())
    }
}

#[async_trait]
impl DeploymentBackend for FakeBackend {
    async fn login(&self, username: &str, password: &str) -> Result<LoginReceipt, BackendError> {
        self.enter("login", Call::Login(username.to_string())).await?;
        if password != "secret" {
            return Err(BackendError::Validation("Invalid credentials".to_string()));
        }
        Ok(LoginReceipt {
            token: "token-1".to_string(),
            username: Some(username.to_string()),
        })
    }

    async fn logout(&self, _credential: &Credential) -> Result<(), BackendError> {
        self.enter("logout", Call::Logout).await
    }

    async fn list_apps(&self, _credential: &Credential) -> Result<Vec<Application>, BackendError> {
        self.enter("list", Call::List).await?;
        Ok(self.state.lock().unwrap().apps.clone())
    }

    async fn import_app(
        &self,
        _credential: &Credential,
        request: &NewApplication,
    ) -> Result<Application, BackendError> {
        self.enter("import", Call::Import(request.clone())).await?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let app = Application {
            id: AppId::new(format!("{}", 100 + state.next_id)),
            name: request.name.clone(),
            slug: Application::slug_for(&request.name),
            git_url: request.git_url.clone(),
            branch: request.branch.clone(),
            status: AppStatus::Imported,
            traefik_rule: None,
            container_port: 8000,
            env_vars: BTreeMap::new(),
            error_message: None,
        };
        state.apps.insert(0, app.clone());
        Ok(app)
    }

    async fn prepare(&self, _credential: &Credential, id: &AppId) -> Result<PrepareReceipt, BackendError> {
        self.enter("prepare", Call::Prepare(id.clone())).await?;
        if self.state.lock().unwrap().prepare_without_rule {
            return Ok(PrepareReceipt {
                traefik_rule: None,
                message: Some("App prepared".to_string()),
            });
        }
        let app = self.update(id, |app| {
            app.status = AppStatus::Prepared;
            app.traefik_rule = Some(format!("Host({})", app.slug));
        })?;
        Ok(PrepareReceipt {
            traefik_rule: app.traefik_rule,
            message: Some(format!("App prepared. Will be accessible at /{}", app.slug)),
        })
    }

    async fn update_config(
        &self,
        _credential: &Credential,
        id: &AppId,
        config: &DeployConfig,
    ) -> Result<(), BackendError> {
        self.enter("update_config", Call::UpdateConfig(id.clone(), config.clone()))
            .await?;
        self.update(id, |app| {
            app.container_port = config.container_port;
            app.env_vars = config.env_vars.clone();
        })
        .map(|_| ())
    }

    async fn deploy(&self, _credential: &Credential, id: &AppId) -> Result<DeployReceipt, BackendError> {
        self.enter("deploy", Call::Deploy(id.clone())).await?;
        let app = self.update(id, |app| app.status = AppStatus::Running)?;
        Ok(DeployReceipt {
            container_id: Some(format!("keystone-app-{}", app.slug)),
            url: Some(format!("/{}", app.slug)),
            message: None,
        })
    }

    async fn stop(&self, _credential: &Credential, id: &AppId) -> Result<(), BackendError> {
        self.enter("stop", Call::Stop(id.clone())).await?;
        self.update(id, |app| app.status = AppStatus::Stopped).map(|_| ())
    }

    async fn logs(&self, _credential: &Credential, id: &AppId) -> Result<String, BackendError> {
        self.enter("logs", Call::Logs(id.clone())).await?;
        Ok(self.state.lock().unwrap().logs.clone())
    }

    async fn delete(&self, _credential: &Credential, id: &AppId) -> Result<(), BackendError> {
        self.enter("delete", Call::Delete(id.clone())).await?;
        self.state.lock().unwrap().apps.retain(|app| &app.id != id);
        Ok(())
    }
}

pub fn app(id: &str, status: AppStatus) -> Application {
    Application {
        id: AppId::new(id),
        name: format!("app-{id}"),
        slug: format!("app-{id}"),
        git_url: format!("https://github.com/u/app-{id}.git"),
        branch: "main".to_string(),
        status,
        traefik_rule: match status {
            AppStatus::Imported | AppStatus::Preparing => None,
            _ => Some(format!("Host(app-{id})")),
        },
        container_port: 8000,
        env_vars: BTreeMap::new(),
        error_message: None,
    }
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub dashboard: Arc<Dashboard>,
}

impl Harness {
    pub fn new() -> Self {
        let backend = FakeBackend::new();
        let session = Session::new();
        session.resume("token-1");
        let shared: SharedBackend = backend.clone();
        let dashboard = Arc::new(Dashboard::new(shared, session, Duration::from_secs(5)));
        Self { backend, dashboard }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.dashboard.controller
    }

    /// Puts `app` on the server and in the registry.
    pub fn seed(&self, app: Application) {
        self.backend.seed(app.clone());
        self.dashboard.registry.with(|registry| registry.upsert(app));
    }

    pub fn local(&self, id: &str) -> Application {
        self.dashboard
            .registry
            .get(&AppId::new(id))
            .map(|entry| entry.app)
            .expect("application in registry")
    }
}
