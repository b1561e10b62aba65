pub mod access;
pub mod config;
pub mod error;
pub mod flow;
pub mod identity;
pub mod matcher;
pub mod service;
pub mod session;
pub mod storage;

// Re-export vision types for convenience
pub use facegate_vision::{face, pipeline, Embedding, EmbeddingShape, Pipeline};

pub use access::{authorize, Action, Decision};
pub use error::{MatchError, ServiceError, SessionError, StoreError, ValidationError};
pub use identity::{Identity, IdentitySummary, Role};
pub use matcher::{CandidateSource, MatchOutcome, Matcher};
pub use service::{AuthService, EnrollmentRequest, LoginRequest, LoginResponse};
pub use session::{Principal, SessionCredential, SessionIssuer, SigningKey};
pub use storage::IdentityStore;
