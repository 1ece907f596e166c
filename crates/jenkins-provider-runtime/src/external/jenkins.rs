//! Authenticated transport to the Jenkins remote access API.

use std::time::Duration;

use jenkins_provider_core::Credentials;
use reqwest::{Client, Response, StatusCode, redirect};
use serde_json::Value;
use url::Url;

use crate::context::PassContext;
use crate::error::ExternalError;

/// Body of a POST request
#[derive(Debug, Clone)]
pub enum PostBody {
    Empty,
    Xml(String),
    Form(Vec<(String, String)>),
}

/// Shared HTTP client bound to one Jenkins instance and one set of credentials.
///
/// Cheap to clone and safe to use from concurrent reconciles.
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    http_client: Client,
    base_url: Url,
    username: String,
    token: String,
}

impl JenkinsClient {
    pub fn new(credentials: &Credentials, request_timeout: Duration) -> Result<Self, ExternalError> {
        let mut base = credentials.url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ExternalError::permanent(format!("invalid Jenkins url {base}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ExternalError::permanent(format!(
                "Jenkins url {base} cannot be a base url"
            )));
        }

        // Jenkins answers mutating calls with a redirect to the item page; not following it
        // keeps the status of the call itself.
        let http_client = Client::builder()
            .timeout(request_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| ExternalError::permanent(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url,
            username: credentials.username.clone(),
            token: credentials.token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base url extended with path segments; each segment is percent-encoded.
    pub fn url<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url, ExternalError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ExternalError::permanent("Jenkins url cannot be a base url"))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment.as_ref());
            }
        }
        Ok(url)
    }

    pub async fn get_text(&self, ctx: &PassContext, url: Url) -> Result<String, ExternalError> {
        let response = self.send_get(ctx, url).await?;
        response
            .text()
            .await
            .map_err(|e| classify_transport(&e))
    }

    pub async fn get_json(&self, ctx: &PassContext, url: Url) -> Result<Value, ExternalError> {
        let response = self.send_get(ctx, url).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ExternalError::permanent(format!("invalid JSON from Jenkins: {e}")))
    }

    pub async fn post(
        &self,
        ctx: &PassContext,
        url: Url,
        query: &[(&str, &str)],
        body: PostBody,
    ) -> Result<(), ExternalError> {
        let mut request = self
            .http_client
            .post(url.clone())
            .basic_auth(&self.username, Some(&self.token))
            .timeout(ctx.remaining())
            .query(query);

        request = match body {
            PostBody::Empty => request,
            PostBody::Xml(xml) => request
                .header("Content-Type", "application/xml; charset=utf-8")
                .body(xml),
            PostBody::Form(fields) => request.form(&fields),
        };

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            tracing::debug!(url = %url, status = %status, "Jenkins POST succeeded");
            return Ok(());
        }
        Err(classify_response(response).await)
    }

    async fn send_get(&self, ctx: &PassContext, url: Url) -> Result<Response, ExternalError> {
        let response = self
            .http_client
            .get(url)
            .basic_auth(&self.username, Some(&self.token))
            .timeout(ctx.remaining())
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_response(response).await)
        }
    }
}

async fn classify_response(response: Response) -> ExternalError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_status(status, &body)
}

/// Map a Jenkins HTTP status onto the adapter error vocabulary
pub fn classify_status(status: StatusCode, body: &str) -> ExternalError {
    let detail = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let message = if detail.is_empty() {
        format!("Jenkins returned {status}")
    } else {
        format!("Jenkins returned {status}: {detail}")
    };

    match status {
        StatusCode::NOT_FOUND => ExternalError::NotFound,
        StatusCode::BAD_REQUEST if body.to_ascii_lowercase().contains("already exists") => {
            ExternalError::already_exists(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ExternalError::transient(message)
        }
        s if s.is_server_error() => ExternalError::transient(message),
        _ => ExternalError::permanent(message),
    }
}

/// Map a transport failure onto the adapter error vocabulary
pub fn classify_transport(err: &reqwest::Error) -> ExternalError {
    if err.is_builder() {
        ExternalError::permanent(format!("invalid request: {err}"))
    } else {
        // timeouts, refused connections, resets and truncated bodies
        ExternalError::transient(err.to_string())
    }
}
