use std::sync::Arc;

use anyhow::Context;
use facegate_vision::Embedding;
use serde::{Deserialize, Serialize};

use crate::access::{self, Action, Decision};
use crate::config::Config;
use crate::error::{ServiceError, ServiceResult};
use crate::identity::{IdentitySummary, NewIdentity, Role};
use crate::matcher::Matcher;
use crate::session::{Clock, Principal, SessionIssuer, SigningKey};
use crate::storage::IdentityStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub name: String,
    pub email: String,
    pub role: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

/// Enrollment, login and every credential-gated operation.
///
/// Safe to share across threads; each call is independent.
#[derive(Debug)]
pub struct AuthService {
    store: Arc<IdentityStore>,
    matcher: Matcher,
    issuer: SessionIssuer,
}

impl AuthService {
    pub fn new(store: Arc<IdentityStore>, matcher: Matcher, issuer: SessionIssuer) -> Self {
        Self {
            store,
            matcher,
            issuer,
        }
    }

    /// Durable store and signing key at the configured paths.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        cfg.validate()?;
        let shape = cfg.embedding.shape();
        let store_path = cfg.store.path();
        let store = IdentityStore::open(&store_path, shape)
            .with_context(|| format!("opening identity store {}", store_path.display()))?;
        let key = SigningKey::load_or_generate(&cfg.session.key_path())?;

        Ok(Self::new(
            Arc::new(store),
            Matcher::new(cfg.matcher, shape),
            SessionIssuer::with_system_clock(key, cfg.session.ttl()),
        ))
    }

    /// Memory-only service with a caller-provided key and clock.
    pub fn in_memory(cfg: &Config, key: SigningKey, clock: Arc<dyn Clock>) -> Self {
        let shape = cfg.embedding.shape();
        Self::new(
            Arc::new(IdentityStore::in_memory(shape)),
            Matcher::new(cfg.matcher, shape),
            SessionIssuer::new(key, cfg.session.ttl(), clock),
        )
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    pub fn enroll(&self, request: EnrollmentRequest) -> ServiceResult<IdentitySummary> {
        let role: Role = request.role.trim().parse()?;
        let identity = self.store.enroll(NewIdentity {
            name: request.name,
            email: request.email,
            role,
            embedding: Embedding::from_vec(request.embedding),
        })?;
        Ok(identity.summary())
    }

    pub fn login(&self, request: LoginRequest) -> ServiceResult<LoginResponse> {
        let query = Embedding::from_vec(request.embedding);
        let outcome = match self.matcher.find_match(self.store.as_ref(), &query) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::debug!("login rejected: {err}");
                let err = ServiceError::from(err);
                if matches!(err, ServiceError::AuthenticationFailed) {
                    log::warn!("face login failed");
                }
                return Err(err);
            }
        };

        log::info!(
            "login accepted for {} (score {:.4})",
            outcome.identity.email,
            outcome.score
        );
        let credential = self.issuer.issue(&outcome.identity);
        Ok(LoginResponse {
            access_token: credential.encode(),
        })
    }

    /// The single gate in front of every protected operation.
    pub fn authorize(&self, token: &str, action: Action) -> ServiceResult<Principal> {
        match access::authorize_token(&self.issuer, token, action) {
            Decision::Granted(principal) => Ok(principal),
            Decision::Unauthorized(err) => {
                log::debug!("credential rejected: {err}");
                Err(ServiceError::Unauthorized)
            }
            Decision::Forbidden { role, action } => Err(ServiceError::Forbidden { role, action }),
        }
    }

    /// Profile of the credential's subject.
    pub fn me(&self, token: &str) -> ServiceResult<IdentitySummary> {
        let principal = self.issuer.verify_token(token)?;
        self.store
            .get_by_id(principal.subject_id)
            .map(|identity| identity.summary())
            .map_err(|_| ServiceError::Unauthorized)
    }

    pub fn list_users(&self, token: &str) -> ServiceResult<Vec<IdentitySummary>> {
        self.authorize(token, Action::ManageUsers)?;
        Ok(self
            .store
            .list_all()
            .iter()
            .map(|identity| identity.summary())
            .collect())
    }

    /// Actions the credential's role may perform.
    pub fn permissions(&self, token: &str) -> ServiceResult<Vec<Action>> {
        let principal = self.issuer.verify_token(token)?;
        Ok(access::permissions(principal.role).to_vec())
    }
}
