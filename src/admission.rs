use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ConfigError, GateConfig};
use crate::metrics::{self, DECISIONS, REQUEST_TOTAL, VERIFICATIONS};
use crate::rate_limit::{TrustStore, Verdict};
use crate::verify::{Credential, CredentialKind, GiteaVerifier};

/// Why a request was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// IP was already trusted.
    Trusted,
    /// A credential was verified on this request and the IP got promoted.
    Verified(CredentialKind),
    /// Unverified client within its window.
    Anonymous,
}

impl Admission {
    fn as_str(&self) -> &'static str {
        match self {
            Admission::Trusted => "trusted",
            Admission::Verified(_) => "verified",
            Admission::Anonymous => "anonymous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Forward(Admission),
    Deny { retry_after: Duration },
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("unable to determine client IP")]
    UnknownClient,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (
            StatusCode::FORBIDDEN,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{}\n", self),
        )
            .into_response()
    }
}

/// Decides per request whether to forward, verify or reject.
pub struct Gate {
    config: GateConfig,
    store: TrustStore,
    verifier: GiteaVerifier,
    clock: Arc<dyn Clock>,
}

impl Gate {
    pub fn new(config: GateConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let verifier = GiteaVerifier::new(
            config.verify_endpoint()?,
            config.cookie_name.clone(),
            config.timeout,
        )?;
        let store = TrustStore::new(config.limits(), clock.now());

        Ok(Self {
            config,
            store,
            verifier,
            clock,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    pub fn verifier(&self) -> &GiteaVerifier {
        &self.verifier
    }

    pub async fn decide(
        &self,
        ip: Option<IpAddr>,
        headers: &HeaderMap,
    ) -> Result<Decision, AdmissionError> {
        let ip = ip.ok_or(AdmissionError::UnknownClient)?.to_canonical();
        let now = self.clock.now();
        REQUEST_TOTAL.inc();

        if let Some(report) = self.store.cleanup(now) {
            let stats = self.store.stats();
            metrics::record_tracked(&stats);
            debug!(
                removed_trusted = report.trusted,
                removed_anonymous = report.anonymous,
                removed_cooldowns = report.cooling,
                tracked_anonymous = stats.anonymous,
                tracked_trusted = stats.trusted,
                "cleanup sweep"
            );
        }

        if self.store.is_trusted(ip, now) {
            return Ok(forward(Admission::Trusted));
        }

        if let Some(kind) = self.try_verify(ip, now, headers).await {
            self.store.promote(ip, now);
            info!(%ip, credential = %kind, "verified by gitea, IP trusted");
            return Ok(forward(Admission::Verified(kind)));
        }

        match self.store.allow_anonymous(ip, now) {
            Verdict::Allowed => Ok(forward(Admission::Anonymous)),
            Verdict::Limited { retry_after } => {
                DECISIONS.with_label_values(&["limited"]).inc();
                debug!(%ip, ?retry_after, "anonymous rate limit exceeded");
                Ok(Decision::Deny { retry_after })
            }
        }
    }

    // Runs at most one verification per credential kind. The cooldown is
    // claimed before the first request goes out so a dropped request still
    // counts. The store lock is never held while gitea is being asked.
    async fn try_verify(
        &self,
        ip: IpAddr,
        now: Instant,
        headers: &HeaderMap,
    ) -> Option<CredentialKind> {
        let credentials = self.credentials(headers);
        if credentials.is_empty() {
            return None;
        }

        if !self.store.try_begin_verification(ip, now) {
            VERIFICATIONS.with_label_values(&["throttled"]).inc();
            debug!(%ip, "verification skipped, IP in cooldown");
            return None;
        }

        let mut verified = None;
        for credential in &credentials {
            let kind = credential.kind();
            match self.verifier.verify(credential).await {
                Ok(true) => {
                    VERIFICATIONS.with_label_values(&["verified"]).inc();
                    verified = Some(kind);
                    break;
                }
                Ok(false) => {
                    VERIFICATIONS.with_label_values(&["rejected"]).inc();
                    debug!(%ip, credential = %kind, "gitea rejected credential");
                }
                Err(e) => {
                    VERIFICATIONS.with_label_values(&["error"]).inc();
                    warn!(%ip, credential = %kind, error = %e, "gitea verification failed");
                }
            }
        }

        verified
    }

    /// Credentials worth checking, in the order they are tried.
    pub fn credentials(&self, headers: &HeaderMap) -> Vec<Credential> {
        let mut found = Vec::with_capacity(2);

        if let Some(value) = cookie_value(headers, &self.config.cookie_name) {
            found.push(Credential::Cookie(value));
        }

        if self.config.trusts_authorization() {
            let authorization = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(value) = authorization {
                found.push(Credential::Authorization(value.to_string()));
            }
        }

        found
    }
}

fn forward(admission: Admission) -> Decision {
    DECISIONS.with_label_values(&[admission.as_str()]).inc();
    Decision::Forward(admission)
}

// First cookie called `name` across all Cookie headers; blank values don't count
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').trim().to_string())
        .filter(|value| !value.is_empty())
}
