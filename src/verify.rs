use reqwest::{StatusCode, header};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::metrics::VERIFY_LATENCY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Cookie,
    Authorization,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Cookie => "cookie",
            CredentialKind::Authorization => "authorization",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a client presented that Gitea can vouch for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Value of the Gitea session cookie.
    Cookie(String),
    /// Raw `Authorization` header value (basic auth or token).
    Authorization(String),
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::Cookie(_) => CredentialKind::Cookie,
            Credential::Authorization(_) => CredentialKind::Authorization,
        }
    }

    fn value(&self) -> &str {
        match self {
            Credential::Cookie(value) | Credential::Authorization(value) => value,
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("verification request to {endpoint} failed: {source}")]
    Transport {
        endpoint: Url,
        #[source]
        source: reqwest::Error,
    },
}

// Asks Gitea whether a credential belongs to a logged-in user
pub struct GiteaVerifier {
    client: reqwest::Client,
    endpoint: Url,
    cookie_name: String,
}

impl GiteaVerifier {
    pub fn new(
        endpoint: Url,
        cookie_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // a redirect to the login page must not pass for a logged-in user
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            endpoint,
            cookie_name: cookie_name.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// One GET against the verify endpoint; `Ok(true)` only for `200 OK`.
    ///
    /// Blank credentials are rejected without touching the network. Dropping
    /// the returned future aborts the outbound request.
    pub async fn verify(&self, credential: &Credential) -> Result<bool, VerifyError> {
        let value = credential.value().trim();
        if value.is_empty() {
            return Ok(false);
        }

        let request = self.client.get(self.endpoint.clone());
        let request = match credential {
            Credential::Cookie(_) => {
                request.header(header::COOKIE, format!("{}={}", self.cookie_name, value))
            }
            Credential::Authorization(_) => request.header(header::AUTHORIZATION, value),
        };

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|source| VerifyError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        VERIFY_LATENCY.observe(started.elapsed().as_secs_f64());

        let status = response.status();
        // drain the body so the connection goes back to the pool
        let _ = response.bytes().await;

        Ok(status == StatusCode::OK)
    }
}
