//! Per-IP rate limiting gateway that lifts the limit for clients Gitea can vouch for.
//!
//! Anonymous clients get a fixed window of requests per IP. A client that
//! presents a Gitea session cookie (or, when enabled, an `Authorization`
//! header) accepted by Gitea's verify endpoint gets its IP trusted for a
//! while and bypasses the window entirely.

pub mod admission;
pub mod clock;
pub mod config;
pub mod directive;
pub mod handlers;
pub mod metrics;
pub mod rate_limit;
pub mod state;
pub mod verify;

pub use admission::{Admission, AdmissionError, Decision, Gate};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Args, ConfigError, GateConfig};
pub use rate_limit::{TrustStore, Verdict};
pub use state::AppState;
pub use verify::{Credential, CredentialKind, GiteaVerifier, VerifyError};
