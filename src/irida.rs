use std::cell::RefCell;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{IridaConfig, RetryPolicy};
use crate::domain::ProjectId;
use crate::error::UploaderError;
use crate::manifest::strip_duplicate_suffix;

/// One request plus three retries, 200ms apart and growing.
const HTTP_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 4,
    base_delay: Duration::from_millis(200),
};

pub const AUTO_PROJECT_DESCRIPTION: &str =
    "Automatically generated using uploader from basemount.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
}

pub trait IridaClient {
    fn list_projects(&self) -> Result<Vec<ProjectSummary>, UploaderError>;
    fn create_project(&self, name: &str, description: &str) -> Result<ProjectId, UploaderError>;
    fn list_sample_names(&self, project: ProjectId) -> Result<Vec<String>, UploaderError>;
}

/// Remote project the run uploads into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedProject {
    pub id: ProjectId,
    pub name: String,
    pub created: bool,
    pub existing_samples: HashSet<String>,
}

/// Finds the project called `name` (minus a trailing " (2)"), creating it
/// when absent. Several projects with that name is an error.
pub fn resolve_project<C: IridaClient + ?Sized>(
    client: &C,
    name: &str,
) -> Result<ResolvedProject, UploaderError> {
    let name = strip_duplicate_suffix(name);
    let matches = client
        .list_projects()?
        .into_iter()
        .filter(|project| project.name == name)
        .collect::<Vec<_>>();

    let (id, created) = match matches.as_slice() {
        [project] => (project.id, false),
        [] => {
            let id = client.create_project(name, AUTO_PROJECT_DESCRIPTION)?;
            info!(project = name, %id, "created project");
            (id, true)
        }
        many => {
            return Err(UploaderError::AmbiguousProject {
                name: name.to_string(),
                count: many.len(),
                ids: many
                    .iter()
                    .map(|project| project.id.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
    };

    let existing_samples = client.list_sample_names(id)?.into_iter().collect();
    Ok(ResolvedProject {
        id,
        name: name.to_string(),
        created,
        existing_samples,
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    resource: T,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Listing<T> {
    #[serde(default)]
    resources: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ProjectResource {
    name: String,
    identifier: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampleResource {
    sample_name: String,
}

pub struct IridaHttpClient {
    client: Client,
    config: IridaConfig,
    token: RefCell<Option<String>>,
}

impl IridaHttpClient {
    pub fn new(config: IridaConfig) -> Result<Self, UploaderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("irida-upload/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| UploaderError::IridaHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| UploaderError::IridaHttp(err.to_string()))?;
        Ok(Self {
            client,
            config,
            token: RefCell::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    fn token(&self) -> Result<String, UploaderError> {
        if let Some(token) = self.token.borrow().as_ref() {
            return Ok(token.clone());
        }
        let url = self.url("oauth/token");
        let form = [
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];
        let response = send_with_retries(|| self.client.post(&url).form(&form))?;
        let token: TokenResponse = read_json(response)?;
        debug!("obtained IRIDA access token");
        self.token.replace(Some(token.access_token.clone()));
        Ok(token.access_token)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, UploaderError> {
        let token = self.token()?;
        let url = self.url(path);
        let response = send_with_retries(|| self.client.get(&url).bearer_auth(&token))?;
        read_json(response)
    }
}

impl IridaClient for IridaHttpClient {
    fn list_projects(&self) -> Result<Vec<ProjectSummary>, UploaderError> {
        let listing: Envelope<Listing<ProjectResource>> = self.get_json("projects")?;
        listing
            .resource
            .resources
            .into_iter()
            .map(|project| {
                Ok(ProjectSummary {
                    id: parse_identifier(&project.identifier)?,
                    name: project.name,
                })
            })
            .collect()
    }

    fn create_project(&self, name: &str, description: &str) -> Result<ProjectId, UploaderError> {
        let token = self.token()?;
        let url = self.url("projects");
        let body = serde_json::json!({
            "name": name,
            "projectDescription": description,
        });
        let response =
            send_with_retries(|| self.client.post(&url).bearer_auth(&token).json(&body))?;
        let created: Envelope<Value> = read_json(response)?;
        parse_identifier(&created.resource["identifier"])
    }

    fn list_sample_names(&self, project: ProjectId) -> Result<Vec<String>, UploaderError> {
        let listing: Envelope<Listing<SampleResource>> =
            self.get_json(&format!("projects/{project}/samples"))?;
        Ok(listing
            .resource
            .resources
            .into_iter()
            .map(|sample| sample.sample_name)
            .collect())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::blocking::Response,
) -> Result<T, UploaderError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "IRIDA request failed".to_string());
        return Err(UploaderError::IridaStatus { status, message });
    }
    response
        .json::<T>()
        .map_err(|err| UploaderError::IridaHttp(err.to_string()))
}

/// IRIDA sends identifiers as strings; older servers send numbers.
pub fn parse_identifier(value: &Value) -> Result<ProjectId, UploaderError> {
    match value {
        Value::String(text) => text.parse(),
        Value::Number(number) => number
            .as_u64()
            .map(ProjectId::new)
            .ok_or_else(|| UploaderError::InvalidProjectId(number.to_string())),
        other => Err(UploaderError::InvalidProjectId(other.to_string())),
    }
}

/// Sends the request built by `make_req`, retrying throttled or unavailable
/// responses and connection failures with linear backoff.
fn send_with_retries<F>(mut make_req: F) -> Result<reqwest::blocking::Response, UploaderError>
where
    F: FnMut() -> reqwest::blocking::RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let retryable = match make_req().send() {
            Ok(resp) if is_retryable_status(resp.status().as_u16()) => Ok(resp),
            Ok(resp) => return Ok(resp),
            Err(err) if is_retryable_error(&err) => Err(err),
            Err(err) => return Err(UploaderError::IridaHttp(err.to_string())),
        };
        if attempt >= HTTP_RETRY.max_attempts {
            return retryable.map_err(|err| UploaderError::IridaHttp(err.to_string()));
        }
        let delay = HTTP_RETRY.delay_after(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying IRIDA request");
        thread::sleep(delay);
        attempt += 1;
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
