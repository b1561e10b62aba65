use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use facegate_vision::ShapeError;
use thiserror::Error;
use uuid::Uuid;

use crate::access::Action;
use crate::identity::Role;

/// Malformed input: missing field, bad shape, non-normalized vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("unknown role '{0}' (expected admin, manager, staff or user)")]
    UnknownRole(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error(transparent)]
    Embedding(#[from] ShapeError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an identity with email {email} is already enrolled")]
    Duplicate { email: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no identity with id {0}")]
    NotFound(Uuid),

    #[error("failed to read identity store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write identity store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode identity store: {0}")]
    Encode(#[from] postcard::Error),

    #[error("identity store {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no enrolled identity cleared the acceptance threshold")]
    NoMatch { best_score: Option<f32> },

    #[error("best candidate ({best:.4}) is too close to the runner-up ({second:.4})")]
    Ambiguous { best: f32, second: f32 },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<ShapeError> for MatchError {
    fn from(err: ShapeError) -> Self {
        MatchError::Validation(ValidationError::from(err))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("malformed session token: {0}")]
    Malformed(String),

    #[error("session signature does not verify")]
    InvalidSignature,

    #[error("session expired at {expires_at}")]
    Expired { expires_at: i64 },
}

/// Outcomes reported by the request surface.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("an identity with email {email} is already enrolled")]
    DuplicateIdentity { email: String },

    /// Covers both "no match" and "ambiguous match" so callers cannot tell them apart.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("unauthorized")]
    Unauthorized,

    #[error("role {role} may not {action}")]
    Forbidden { role: Role, action: Action },

    #[error("identity {0} not found")]
    NotFound(Uuid),

    #[error("identity store failure: {0}")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { email } => ServiceError::DuplicateIdentity { email },
            StoreError::Validation(inner) => ServiceError::Validation(inner),
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Storage(other),
        }
    }
}

impl From<MatchError> for ServiceError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::NoMatch { .. } | MatchError::Ambiguous { .. } => {
                ServiceError::AuthenticationFailed
            }
            MatchError::Validation(inner) => ServiceError::Validation(inner),
        }
    }
}

impl From<SessionError> for ServiceError {
    fn from(_: SessionError) -> Self {
        ServiceError::Unauthorized
    }
}

impl ServiceError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ServiceError::Validation(_) => ExitCode::from(2),
            ServiceError::DuplicateIdentity { .. } => ExitCode::from(3),
            ServiceError::AuthenticationFailed => ExitCode::from(4),
            ServiceError::Unauthorized => ExitCode::from(5),
            ServiceError::Forbidden { .. } => ExitCode::from(6),
            ServiceError::NotFound(_) => ExitCode::from(7),
            ServiceError::Storage(_) => ExitCode::from(1),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_match_and_ambiguous_are_indistinguishable() {
        let a = ServiceError::from(MatchError::NoMatch {
            best_score: Some(0.5),
        });
        let b = ServiceError::from(MatchError::Ambiguous {
            best: 0.99,
            second: 0.985,
        });
        assert_eq!(a.to_string(), b.to_string());
        assert!(matches!(a, ServiceError::AuthenticationFailed));
        assert!(matches!(b, ServiceError::AuthenticationFailed));
    }

    #[test]
    fn session_failures_collapse_to_unauthorized() {
        for err in [
            SessionError::InvalidSignature,
            SessionError::Expired { expires_at: 0 },
            SessionError::Malformed("x".into()),
        ] {
            assert!(matches!(ServiceError::from(err), ServiceError::Unauthorized));
        }
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        let dup = ServiceError::from(StoreError::Duplicate {
            email: "a@b.c".into(),
        });
        assert!(matches!(dup, ServiceError::DuplicateIdentity { .. }));

        let corrupt = ServiceError::from(StoreError::Corrupt {
            path: PathBuf::from("x"),
            message: "bad".into(),
        });
        assert!(matches!(corrupt, ServiceError::Storage(_)));
    }
}
