//! Client-side login state machine.
//!
//! `Idle → Submitting → Authenticated | Failed`; `Failed` may resubmit and
//! any state returns to `Idle` on logout. Transitions are driven by service
//! outcomes only.

use thiserror::Error;

use crate::error::{ServiceError, ServiceResult};
use crate::identity::IdentitySummary;
use crate::service::{AuthService, LoginRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    InvalidInput,
    AuthenticationFailed,
    Unauthorized,
    Forbidden,
    Unavailable,
}

impl From<&ServiceError> for FailureReason {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::Validation(_) | ServiceError::DuplicateIdentity { .. } => {
                FailureReason::InvalidInput
            }
            ServiceError::AuthenticationFailed => FailureReason::AuthenticationFailed,
            ServiceError::Unauthorized | ServiceError::NotFound(_) => FailureReason::Unauthorized,
            ServiceError::Forbidden { .. } => FailureReason::Forbidden,
            ServiceError::Storage(_) => FailureReason::Unavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginState {
    Idle,
    Submitting,
    Authenticated {
        access_token: String,
        profile: IdentitySummary,
    },
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl LoginState {
    fn name(&self) -> &'static str {
        match self {
            LoginState::Idle => "idle",
            LoginState::Submitting => "submitting",
            LoginState::Authenticated { .. } => "authenticated",
            LoginState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("cannot {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct LoginFlow {
    state: LoginState,
}

impl Default for LoginFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginFlow {
    pub fn new() -> Self {
        Self {
            state: LoginState::Idle,
        }
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    pub fn access_token(&self) -> Option<&str> {
        match &self.state {
            LoginState::Authenticated { access_token, .. } => Some(access_token),
            _ => None,
        }
    }

    pub fn submit(&mut self) -> Result<(), FlowError> {
        match self.state {
            LoginState::Idle | LoginState::Failed { .. } => {
                self.state = LoginState::Submitting;
                Ok(())
            }
            _ => Err(self.invalid("submit")),
        }
    }

    pub fn resolve(
        &mut self,
        outcome: ServiceResult<(String, IdentitySummary)>,
    ) -> Result<&LoginState, FlowError> {
        if self.state != LoginState::Submitting {
            return Err(self.invalid("resolve"));
        }

        self.state = match outcome {
            Ok((access_token, profile)) => LoginState::Authenticated {
                access_token,
                profile,
            },
            Err(err) => LoginState::Failed {
                reason: FailureReason::from(&err),
                message: err.to_string(),
            },
        };
        Ok(&self.state)
    }

    /// Drops any held token.
    pub fn logout(&mut self) {
        self.state = LoginState::Idle;
    }

    /// Submit a login, then fetch the profile the new token belongs to.
    /// A token whose profile lookup fails is discarded.
    pub fn run(
        &mut self,
        service: &AuthService,
        request: LoginRequest,
    ) -> Result<&LoginState, FlowError> {
        self.submit()?;
        let outcome = service.login(request).and_then(|response| {
            let profile = service.me(&response.access_token)?;
            Ok((response.access_token, profile))
        });
        self.resolve(outcome)
    }

    fn invalid(&self, event: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            state: self.state.name(),
            event,
        }
    }
}
