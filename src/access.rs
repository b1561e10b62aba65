use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, ValidationError};
use crate::identity::Role;
use crate::session::{Principal, SessionCredential, SessionIssuer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ManageUsers,
    ViewAnalytics,
    AccessSecureContent,
}

impl Action {
    pub const ALL: [Action; 3] = [
        Action::ManageUsers,
        Action::ViewAnalytics,
        Action::AccessSecureContent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ManageUsers => "manage-users",
            Action::ViewAnalytics => "view-analytics",
            Action::AccessSecureContent => "access-secure-content",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownAction(s.to_string()))
    }
}

/// Role → permitted actions. The only place role privileges are defined.
pub fn permissions(role: Role) -> &'static [Action] {
    match role {
        Role::Admin => &[
            Action::ManageUsers,
            Action::ViewAnalytics,
            Action::AccessSecureContent,
        ],
        Role::Manager => &[Action::ViewAnalytics, Action::AccessSecureContent],
        Role::Staff | Role::User => &[Action::AccessSecureContent],
    }
}

impl Role {
    pub fn permits(&self, action: Action) -> bool {
        permissions(*self).contains(&action)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Granted(Principal),
    /// Credential missing, unverifiable or expired.
    Unauthorized(SessionError),
    /// Valid credential whose role lacks the action.
    Forbidden { role: Role, action: Action },
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted(_))
    }
}

pub fn authorize(issuer: &SessionIssuer, credential: &SessionCredential, action: Action) -> Decision {
    match issuer.verify(credential) {
        Ok(principal) => decide(principal, action),
        Err(err) => Decision::Unauthorized(err),
    }
}

pub fn authorize_token(issuer: &SessionIssuer, token: &str, action: Action) -> Decision {
    match issuer.verify_token(token) {
        Ok(principal) => decide(principal, action),
        Err(err) => Decision::Unauthorized(err),
    }
}

fn decide(principal: Principal, action: Action) -> Decision {
    if principal.role.permits(action) {
        Decision::Granted(principal)
    } else {
        log::debug!("role {} denied {}", principal.role, action);
        Decision::Forbidden {
            role: principal.role,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::session::{ManualClock, SigningKey};
    use chrono::Utc;
    use facegate_vision::Embedding;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn issuer() -> (SessionIssuer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let issuer = SessionIssuer::new(
            SigningKey::generate(),
            Duration::from_secs(300),
            clock.clone(),
        );
        (issuer, clock)
    }

    fn identity(role: Role) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            name: role.to_string(),
            email: format!("{role}@x.com"),
            role,
            embedding: Embedding::from_vec(vec![1.0]),
            enrolled_at: Utc::now(),
        }
    }

    #[test]
    fn authorization_matrix() {
        let expected = [
            (Role::Admin, Action::ManageUsers, true),
            (Role::Admin, Action::ViewAnalytics, true),
            (Role::Admin, Action::AccessSecureContent, true),
            (Role::Manager, Action::ManageUsers, false),
            (Role::Manager, Action::ViewAnalytics, true),
            (Role::Manager, Action::AccessSecureContent, true),
            (Role::Staff, Action::ManageUsers, false),
            (Role::Staff, Action::ViewAnalytics, false),
            (Role::Staff, Action::AccessSecureContent, true),
            (Role::User, Action::ManageUsers, false),
            (Role::User, Action::ViewAnalytics, false),
            (Role::User, Action::AccessSecureContent, true),
        ];

        let (issuer, _) = issuer();
        for (role, action, granted) in expected {
            let credential = issuer.issue(&identity(role));
            let decision = authorize(&issuer, &credential, action);
            if granted {
                assert!(decision.is_granted(), "{role} should be granted {action}");
            } else {
                assert_eq!(decision, Decision::Forbidden { role, action });
            }
        }
    }

    #[test]
    fn expired_or_forged_credentials_are_unauthorized() {
        let (issuer, clock) = issuer();
        let credential = issuer.issue(&identity(Role::Admin));

        let mut forged = credential.clone();
        forged.role = Role::Admin;
        forged.subject_id = Uuid::new_v4();
        assert_eq!(
            authorize(&issuer, &forged, Action::AccessSecureContent),
            Decision::Unauthorized(SessionError::InvalidSignature)
        );

        clock.advance(Duration::from_secs(301));
        assert!(matches!(
            authorize(&issuer, &credential, Action::AccessSecureContent),
            Decision::Unauthorized(SessionError::Expired { .. })
        ));
    }

    #[test]
    fn garbage_token_is_unauthorized() {
        let (issuer, _) = issuer();
        assert!(matches!(
            authorize_token(&issuer, "garbage", Action::AccessSecureContent),
            Decision::Unauthorized(SessionError::Malformed(_))
        ));
    }

    #[test]
    fn actions_parse_from_kebab_case() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
            assert_eq!(
                serde_json::to_string(&action).unwrap(),
                format!("\"{}\"", action.as_str())
            );
        }
        assert!("delete-everything".parse::<Action>().is_err());
    }
}
