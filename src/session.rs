//! Signed, time-bounded session credentials.
//!
//! A credential carries the subject id and a snapshot of the role taken at
//! issuance. Its signature is HMAC-SHA256 over the canonical JSON encoding
//! of `{sub, role, iat, exp}` under a process-wide key. Tokens travel as
//! `base64url(claims) "." base64url(signature)`.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::SessionError;
use crate::identity::{Identity, Role};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;

/// Process-wide HMAC key. Read-only once loaded.
#[derive(Clone)]
pub struct SigningKey([u8; KEY_LEN]);

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl SigningKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let raw = hex::decode(encoded.trim()).context("signing key is not valid hex")?;
        ensure!(
            raw.len() == KEY_LEN,
            "signing key must be {} bytes, found {}",
            KEY_LEN,
            raw.len()
        );
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Read the key at `path`, or create it (mode 0600) when absent.
    ///
    /// Concurrent first starts agree on one key: the loser of the race reads
    /// back whatever the winner published.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .with_context(|| format!("creating key directory {}", parent.display()))?;

        let key = Self::generate();
        // NamedTempFile is created 0600, so the key is never visible to others.
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("creating temp file in {}", parent.display()))?;
        tmp.write_all(key.to_hex().as_bytes())?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(path) {
            Ok(_) => {
                log::info!("generated new signing key at {}", path.display());
                Ok(key)
            }
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("signing key {} appeared concurrently, reusing it", path.display());
                Self::load(path)
            }
            Err(err) => Err(err.error)
                .with_context(|| format!("writing signing key {}", path.display())),
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading signing key {}", path.display()))?;
        Self::from_hex(&raw).with_context(|| format!("parsing signing key {}", path.display()))
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length; KEY_LEN bytes never fails.
        <HmacSha256 as Mac>::new_from_slice(&self.0).unwrap_or_else(|_| unreachable!())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::seconds(by.as_secs() as i64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    role: Role,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub subject_id: Uuid,
    pub role: Role,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds; the credential is valid up to and including this second.
    pub expires_at: i64,
    pub signature: Vec<u8>,
}

impl SessionCredential {
    fn claims(&self) -> Claims {
        Claims {
            sub: self.subject_id,
            role: self.role,
            iat: self.issued_at,
            exp: self.expires_at,
        }
    }

    pub fn encode(&self) -> String {
        let payload = claims_bytes(&self.claims());
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(&self.signature)
        )
    }

    pub fn decode(token: &str) -> Result<Self, SessionError> {
        let (payload, signature) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| SessionError::Malformed("missing signature segment".into()))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|err| SessionError::Malformed(format!("claims: {err}")))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|err| SessionError::Malformed(format!("signature: {err}")))?;
        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|err| SessionError::Malformed(format!("claims: {err}")))?;

        Ok(Self {
            subject_id: claims.sub,
            role: claims.role,
            issued_at: claims.iat,
            expires_at: claims.exp,
            signature,
        })
    }
}

fn claims_bytes(claims: &Claims) -> Vec<u8> {
    // Plain struct of ids, enums and integers; serializing cannot fail.
    serde_json::to_vec(claims).unwrap_or_default()
}

/// Identity and role proven by a verified credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: Uuid,
    pub role: Role,
}

pub struct SessionIssuer {
    key: SigningKey,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionIssuer {
    pub fn new(key: SigningKey, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { key, ttl, clock }
    }

    pub fn with_system_clock(key: SigningKey, ttl: Duration) -> Self {
        Self::new(key, ttl, Arc::new(SystemClock))
    }

    pub fn issue(&self, identity: &Identity) -> SessionCredential {
        let issued_at = self.clock.now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = issued_at.saturating_add(ttl);

        let claims = Claims {
            sub: identity.id,
            role: identity.role,
            iat: issued_at,
            exp: expires_at,
        };
        let mut mac = self.key.mac();
        mac.update(&claims_bytes(&claims));

        SessionCredential {
            subject_id: identity.id,
            role: identity.role,
            issued_at,
            expires_at,
            signature: mac.finalize().into_bytes().to_vec(),
        }
    }

    pub fn verify(&self, credential: &SessionCredential) -> Result<Principal, SessionError> {
        let mut mac = self.key.mac();
        mac.update(&claims_bytes(&credential.claims()));
        mac.verify_slice(&credential.signature)
            .map_err(|_| SessionError::InvalidSignature)?;

        if self.clock.now().timestamp() > credential.expires_at {
            return Err(SessionError::Expired {
                expires_at: credential.expires_at,
            });
        }

        Ok(Principal {
            subject_id: credential.subject_id,
            role: credential.role,
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<Principal, SessionError> {
        self.verify(&SessionCredential::decode(token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use facegate_vision::Embedding;
    use tempfile::TempDir;

    fn identity(role: Role) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            name: "Jane".into(),
            email: "jane@x.com".into(),
            role,
            embedding: Embedding::from_vec(vec![1.0]),
            enrolled_at: Utc::now(),
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn issuer_with_clock(ttl: u64) -> (SessionIssuer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let issuer = SessionIssuer::new(
            SigningKey::from_bytes([7u8; KEY_LEN]),
            Duration::from_secs(ttl),
            clock.clone(),
        );
        (issuer, clock)
    }

    #[test]
    fn issue_sets_window_and_verifies() {
        let (issuer, _) = issuer_with_clock(600);
        let jane = identity(Role::Admin);
        let credential = issuer.issue(&jane);

        assert_eq!(credential.issued_at, start().timestamp());
        assert_eq!(credential.expires_at, start().timestamp() + 600);
        assert_eq!(
            issuer.verify(&credential).unwrap(),
            Principal {
                subject_id: jane.id,
                role: Role::Admin
            }
        );
    }

    #[test]
    fn expiry_boundary() {
        let (issuer, clock) = issuer_with_clock(60);
        let credential = issuer.issue(&identity(Role::User));

        clock.advance(Duration::from_secs(60));
        assert!(issuer.verify(&credential).is_ok());

        clock.advance(Duration::from_secs(1));
        assert_eq!(
            issuer.verify(&credential),
            Err(SessionError::Expired {
                expires_at: credential.expires_at
            })
        );
    }

    #[test]
    fn tampered_claims_fail_signature() {
        let (issuer, _) = issuer_with_clock(60);
        let mut credential = issuer.issue(&identity(Role::User));
        credential.role = Role::Admin;
        assert_eq!(issuer.verify(&credential), Err(SessionError::InvalidSignature));

        let mut credential = issuer.issue(&identity(Role::User));
        credential.expires_at += 3600;
        assert_eq!(issuer.verify(&credential), Err(SessionError::InvalidSignature));
    }

    #[test]
    fn signature_checked_before_expiry() {
        let (issuer, clock) = issuer_with_clock(60);
        let mut credential = issuer.issue(&identity(Role::Staff));
        credential.signature[0] ^= 0x01;
        clock.advance(Duration::from_secs(3600));
        assert_eq!(issuer.verify(&credential), Err(SessionError::InvalidSignature));
    }

    #[test]
    fn other_key_rejects_token() {
        let (issuer, _) = issuer_with_clock(60);
        let token = issuer.issue(&identity(Role::Manager)).encode();

        let other = SessionIssuer::with_system_clock(SigningKey::generate(), Duration::from_secs(60));
        assert_eq!(other.verify_token(&token), Err(SessionError::InvalidSignature));
    }

    #[test]
    fn token_encoding_preserves_credential() {
        let (issuer, _) = issuer_with_clock(60);
        let credential = issuer.issue(&identity(Role::Staff));
        let token = credential.encode();

        assert_eq!(SessionCredential::decode(&token).unwrap(), credential);
        assert_eq!(issuer.verify_token(&token).unwrap().role, Role::Staff);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let (issuer, _) = issuer_with_clock(60);
        for token in ["", "no-dot", "!!!.abc", "e30.!!!", "e30.AAAA"] {
            assert!(
                matches!(issuer.verify_token(token), Err(SessionError::Malformed(_))),
                "token {token:?}"
            );
        }
    }

    #[test]
    fn key_file_is_created_once_and_reused() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys").join("signing.key");

        let first = SigningKey::load_or_generate(&path).unwrap();
        let second = SigningKey::load_or_generate(&path).unwrap();
        assert_eq!(first.to_hex(), second.to_hex());
        assert_eq!(first.to_hex().len(), KEY_LEN * 2);

        fs::write(&path, "abcd").unwrap();
        assert!(SigningKey::load_or_generate(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("signing.key");
        SigningKey::load_or_generate(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn racing_first_starts_share_one_key() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("signing.key");

        let keys: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| SigningKey::load_or_generate(&path).unwrap().to_hex()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let on_disk = SigningKey::load_or_generate(&path).unwrap().to_hex();
        assert!(keys.iter().all(|k| *k == on_disk));
    }

    #[test]
    fn debug_output_hides_key() {
        let key = SigningKey::from_bytes([0xab; KEY_LEN]);
        assert!(!format!("{key:?}").contains("ab"));
    }
}
