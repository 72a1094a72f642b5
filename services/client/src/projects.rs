//! services/client/src/projects.rs
//!
//! The projects and auth client. These endpoints sit outside the sync
//! core and are consumed by the shell directly: login/register yield the
//! bearer token every other call carries, and the project list is where
//! a working document context begins.

use crate::adapters::http_backend::{map_status_error, map_transport_error, AuthToken};
use gutachter_core::{PortError, PortResult};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A project record as the backend reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct ProjectsResponse {
    projects: Vec<Project>,
}

#[derive(Deserialize)]
struct ProjectResponse {
    project: Project,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ProjectBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

pub struct ProjectsClient {
    client: Client,
    base_url: String,
    auth: Arc<AuthToken>,
}

impl ProjectsClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        auth: Arc<AuthToken>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = self.auth.get() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> PortResult<T> {
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, &body));
        }
        serde_json::from_slice(&body).map_err(|e| PortError::Decode(e.to_string()))
    }

    // --- Auth ---

    pub async fn login(&self, email: &str, password: &str) -> PortResult<()> {
        let response = self
            .request(Method::POST, "/auth/login")
            .json(&CredentialsBody { email, password })
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: TokenResponse = Self::read_json(response).await?;
        self.auth.set(decoded.token);
        info!("Logged in as {}", email);
        Ok(())
    }

    pub async fn register(&self, email: &str, password: &str) -> PortResult<()> {
        let response = self
            .request(Method::POST, "/auth/register")
            .json(&CredentialsBody { email, password })
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: TokenResponse = Self::read_json(response).await?;
        self.auth.set(decoded.token);
        info!("Registered account {}", email);
        Ok(())
    }

    pub fn logout(&self) {
        self.auth.clear();
    }

    // --- Projects CRUD ---

    pub async fn list(&self) -> PortResult<Vec<Project>> {
        let response = self
            .request(Method::GET, "/projects")
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: ProjectsResponse = Self::read_json(response).await?;
        Ok(decoded.projects)
    }

    pub async fn create(&self, name: &str, description: Option<&str>) -> PortResult<Project> {
        let response = self
            .request(Method::POST, "/projects")
            .json(&ProjectBody { name, description })
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: ProjectResponse = Self::read_json(response).await?;
        Ok(decoded.project)
    }

    pub async fn update(
        &self,
        project_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<Project> {
        let response = self
            .request(Method::PUT, &format!("/projects/{}", project_id))
            .json(&ProjectBody { name, description })
            .send()
            .await
            .map_err(map_transport_error)?;
        let decoded: ProjectResponse = Self::read_json(response).await?;
        Ok(decoded.project)
    }

    pub async fn delete(&self, project_id: &str) -> PortResult<()> {
        let response = self
            .request(Method::DELETE, &format!("/projects/{}", project_id))
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }
        Ok(())
    }
}
