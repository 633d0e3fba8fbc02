use anyhow::{Context, Error};
use async_trait::async_trait;
use futures::TryFutureExt;
use map_macro::hash_map;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Client, RequestBuilder, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::{
    domain::{
        model::{
            AppId, Application, DeployConfig, DeployReceipt, LoginReceipt, NewApplication,
            PrepareReceipt,
        },
        port::{Credential, DeploymentBackend},
    },
    errors::BackendError,
};

/// REST adapter for the deployment backend, rooted at `{base_url}/api/`.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct LogsReceipt {
    #[serde(default)]
    logs: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("Can't build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder, credential: &Credential) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Token {}", credential.expose()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        let message = error_message(status, &body);
        Err(match status {
            StatusCode::UNAUTHORIZED => BackendError::Unauthorized,
            StatusCode::BAD_REQUEST => BackendError::Validation(message),
            _ => BackendError::Rejected {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        self.send(request)
            .await?
            .json::<T>()
            .map_err(|e| BackendError::Decode(e.to_string()))
            .await
    }
}

/// `error` or `detail` from the body, else field validation messages, else a
/// generic status line.
fn error_message(status: StatusCode, body: &Value) -> String {
    for key in ["error", "detail"] {
        if let Some(message) = body.get(key).and_then(Value::as_str) {
            return message.to_string();
        }
    }
    if let Some(fields) = body.as_object() {
        let messages: Vec<String> = fields
            .iter()
            .filter_map(|(field, errors)| {
                let text = match errors {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(" "),
                    Value::String(text) => text.clone(),
                    _ => return None,
                };
                (!text.is_empty()).then(|| format!("{field}: {text}"))
            })
            .collect();
        if !messages.is_empty() {
            return messages.join("; ");
        }
    }
    format!("Request failed: {}", status.as_u16())
}

#[async_trait]
impl DeploymentBackend for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<LoginReceipt, BackendError> {
        let body = hash_map! {
            "username" => username,
            "password" => password
        };
        self.send_json(self.client.post(self.url("auth/login/")).json(&body))
            .await
    }

    async fn logout(&self, credential: &Credential) -> Result<(), BackendError> {
        let request = self.authorized(self.client.post(self.url("auth/logout/")), credential);
        self.send(request).await.map(|_| ())
    }

    async fn list_apps(&self, credential: &Credential) -> Result<Vec<Application>, BackendError> {
        let request = self.authorized(self.client.get(self.url("apps/")), credential);
        self.send_json(request).await
    }

    async fn import_app(
        &self,
        credential: &Credential,
        request: &NewApplication,
    ) -> Result<Application, BackendError> {
        let request = self
            .authorized(self.client.post(self.url("apps/")), credential)
            .json(request);
        self.send_json(request).await
    }

    async fn prepare(&self, credential: &Credential, id: &AppId) -> Result<PrepareReceipt, BackendError> {
        let request = self.authorized(
            self.client.post(self.url(&format!("apps/{id}/prepare/"))),
            credential,
        );
        self.send_json(request).await
    }

    async fn update_config(
        &self,
        credential: &Credential,
        id: &AppId,
        config: &DeployConfig,
    ) -> Result<(), BackendError> {
        let request = self
            .authorized(self.client.patch(self.url(&format!("apps/{id}/"))), credential)
            .json(config);
        self.send(request).await.map(|_| ())
    }

    async fn deploy(&self, credential: &Credential, id: &AppId) -> Result<DeployReceipt, BackendError> {
        let request = self.authorized(
            self.client.post(self.url(&format!("apps/{id}/deploy/"))),
            credential,
        );
        self.send_json(request).await
    }

    async fn stop(&self, credential: &Credential, id: &AppId) -> Result<(), BackendError> {
        let request = self.authorized(
            self.client.post(self.url(&format!("apps/{id}/stop/"))),
            credential,
        );
        self.send(request).await.map(|_| ())
    }

    async fn logs(&self, credential: &Credential, id: &AppId) -> Result<String, BackendError> {
        let request = self.authorized(
            self.client.get(self.url(&format!("apps/{id}/logs/"))),
            credential,
        );
        let receipt: LogsReceipt = self.send_json(request).await?;
        Ok(receipt.logs.unwrap_or_default())
    }

    async fn delete(&self, credential: &Credential, id: &AppId) -> Result<(), BackendError> {
        let request = self.authorized(
            self.client.delete(self.url(&format!("apps/{id}/"))),
            credential,
        );
        self.send(request).await.map(|_| ())
    }
}
