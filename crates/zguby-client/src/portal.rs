use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use zguby_core::models::{
    DatasetRequest, DatasetSubmissionRequest, ResourceRequest, SubmittedDataset, SubmittedResource,
};
use zguby_core::{AppError, Credential, HttpConfig, LoginCredentials, PortalApi};

/// Longest error body kept in `AppError` messages.
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Body of a successful `POST /auth/login`.
///
/// Some deployments name the token `access_token`; `expires_in` is optional
/// and counted in seconds.
#[derive(Deserialize, Debug)]
struct LoginResponse {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl LoginResponse {
    fn into_credential(self, now: DateTime<Utc>) -> Result<Credential, AppError> {
        if self.token.trim().is_empty() {
            return Err(AppError::AuthError(
                "login response carried an empty token".to_string(),
            ));
        }
        let credential = Credential::new(self.token);
        Ok(match self.expires_in {
            Some(seconds) if seconds > 0 => {
                credential.with_expiry(now + chrono::Duration::seconds(seconds))
            }
            _ => credential,
        })
    }
}

/// JSON:API envelope returned by dataset and resource creation.
///
/// ```json
/// {
///     "data": { "id": "...", "type": "resource", "attributes": { "url": "..." } },
///     "links": { "self": "..." }
/// }
/// ```
#[derive(Deserialize, Debug)]
struct Created {
    data: CreatedData,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Deserialize, Debug)]
struct CreatedData {
    id: String,
    #[serde(default)]
    attributes: CreatedAttributes,
}

#[derive(Deserialize, Debug, Default)]
struct CreatedAttributes {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Links {
    #[serde(rename = "self", default)]
    self_link: Option<String>,
}

impl Created {
    fn into_resource(self) -> SubmittedResource {
        let url = self
            .data
            .attributes
            .url
            .or_else(|| self.links.and_then(|l| l.self_link));
        SubmittedResource {
            id: self.data.id,
            url,
        }
    }

    /// Datasets are announced by their `self` link, which points at the
    /// portal record rather than the gateway landing page.
    fn into_dataset(self) -> SubmittedDataset {
        let url = self
            .links
            .and_then(|l| l.self_link)
            .or(self.data.attributes.url);
        SubmittedDataset {
            id: self.data.id,
            url,
        }
    }
}

/// HTTP client for the dane.gov.pl-compatible publication API.
///
/// Every call carries the timeout from [`HttpConfig`]; a timeout surfaces as
/// `AppError::Timeout`, a 401 as `AppError::Unauthorized`.
///
/// # Examples
///
/// ```no_run
/// use zguby_client::PortalClient;
/// use zguby_core::HttpConfig;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = PortalClient::new("https://api.dane.gov.pl", &HttpConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PortalClient {
    client: Client,
    base_url: Url,
}

impl PortalClient {
    /// Creates a client for the portal at `base_url_str`.
    ///
    /// A path prefix such as `/api/v1` is kept: endpoints are resolved
    /// relative to it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the URL is invalid.
    /// Returns `AppError::NetworkError` if the HTTP client cannot be built.
    pub fn new(base_url_str: &str, config: &HttpConfig) -> Result<Self, AppError> {
        let mut base_url = Url::parse(base_url_str)
            .map_err(|_| AppError::ConfigError(format!("Invalid portal URL: {}", base_url_str)))?;

        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::ConfigError(format!("Invalid endpoint {path}: {e}")))
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AppError> {
        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(AppError::from_status(status.as_u16(), truncate(body)));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

impl PortalApi for PortalClient {
    async fn login(&self, credentials: &LoginCredentials) -> Result<Credential, AppError> {
        let url = self.endpoint("auth/login")?;
        let request = self.client.post(url).json(&LoginRequest {
            email: &credentials.email,
            password: credentials.password(),
        });

        let response: LoginResponse = self.execute(request).await?;
        response.into_credential(Utc::now())
    }

    async fn create_dataset(
        &self,
        token: &str,
        request: &DatasetRequest,
    ) -> Result<String, AppError> {
        let url = self.endpoint("api/datasets")?;
        debug!(%url, title = %request.data.attributes.title, "Creating dataset");

        let created: Created = self
            .execute(self.client.post(url).bearer_auth(token).json(request))
            .await?;
        Ok(created.data.id)
    }

    async fn submit_resource(
        &self,
        token: &str,
        dataset_id: &str,
        idempotency_key: &str,
        request: &ResourceRequest,
    ) -> Result<SubmittedResource, AppError> {
        let url = self.endpoint(&format!("api/datasets/{dataset_id}/resources"))?;
        debug!(%url, idempotency_key, "Submitting resource");

        let created: Created = self
            .execute(
                self.client
                    .post(url)
                    .bearer_auth(token)
                    .header("Idempotency-Key", idempotency_key)
                    .json(request),
            )
            .await?;
        Ok(created.into_resource())
    }

    async fn submit_dataset(
        &self,
        token: &str,
        idempotency_key: &str,
        request: &DatasetSubmissionRequest,
    ) -> Result<SubmittedDataset, AppError> {
        let url = self.endpoint("api/datasets")?;
        debug!(%url, idempotency_key, title = %request.data.attributes.title, "Submitting dataset");

        let created: Created = self
            .execute(
                self.client
                    .post(url)
                    .bearer_auth(token)
                    .header("Idempotency-Key", idempotency_key)
                    .json(request),
            )
            .await?;
        Ok(created.into_dataset())
    }
}

fn transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(e.to_string())
    } else {
        AppError::NetworkError(e)
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}
