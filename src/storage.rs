use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{SubsecRound, Utc};
use facegate_vision::EmbeddingShape;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, ValidationError};
use crate::identity::{email_key, Identity, NewIdentity};

const STORE_VERSION: u32 = 1;

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    dimension: u32,
    identities: Vec<Identity>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    dimension: u32,
    identities: &'a [Identity],
}

#[derive(Debug, Default)]
struct Inner {
    identities: Vec<Identity>,
    by_email: HashMap<String, usize>,
    by_id: HashMap<Uuid, usize>,
}

impl Inner {
    fn index(&mut self, identity: &Identity, position: usize) {
        self.by_email.insert(email_key(&identity.email), position);
        self.by_id.insert(identity.id, position);
    }
}

/// Enrolled identities, shared between concurrent requests.
///
/// Enrollment runs entirely under the write lock: the email uniqueness check,
/// the optional file rewrite and the insert are one critical section. Readers
/// take the read lock and therefore only ever see fully enrolled identities.
#[derive(Debug)]
pub struct IdentityStore {
    shape: EmbeddingShape,
    path: Option<PathBuf>,
    inner: RwLock<Inner>,
}

impl IdentityStore {
    pub fn in_memory(shape: EmbeddingShape) -> Self {
        Self {
            shape,
            path: None,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Open a store backed by `path`, loading whatever it already holds.
    pub fn open(path: &Path, shape: EmbeddingShape) -> StoreResult<Self> {
        let identities = load_identities(path, &shape)?;

        let mut inner = Inner::default();
        for (position, identity) in identities.iter().enumerate() {
            if inner.by_email.contains_key(&email_key(&identity.email)) {
                return Err(corrupt(path, format!("duplicate email {}", identity.email)));
            }
            inner.index(identity, position);
        }
        inner.identities = identities;
        log::debug!(
            "loaded {} identities from {}",
            inner.identities.len(),
            path.display()
        );

        Ok(Self {
            shape,
            path: Some(path.to_path_buf()),
            inner: RwLock::new(inner),
        })
    }

    pub fn enroll(&self, new: NewIdentity) -> StoreResult<Identity> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyField("name").into());
        }
        let email = new.email.trim();
        if email.is_empty() {
            return Err(ValidationError::EmptyField("email").into());
        }
        if !email.contains('@') {
            return Err(ValidationError::InvalidEmail(email.to_string()).into());
        }
        self.shape
            .validate(&new.embedding)
            .map_err(ValidationError::from)?;

        let key = email_key(email);
        let mut inner = self.write();
        if inner.by_email.contains_key(&key) {
            return Err(StoreError::Duplicate {
                email: email.to_string(),
            });
        }

        let identity = Identity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role: new.role,
            embedding: new.embedding,
            // The file keeps milliseconds; match it so a reload is identical.
            enrolled_at: Utc::now().trunc_subsecs(3),
        };

        inner.identities.push(identity.clone());
        if let Some(path) = &self.path {
            if let Err(err) = write_identities(path, &self.shape, &inner.identities) {
                inner.identities.pop();
                return Err(err);
            }
        }
        let position = inner.identities.len() - 1;
        inner.index(&identity, position);

        log::info!("enrolled {} <{}> as {}", identity.name, identity.email, identity.role);
        Ok(identity)
    }

    /// All identities in enrollment order.
    pub fn list_all(&self) -> Vec<Identity> {
        self.read().identities.clone()
    }

    pub fn get_by_id(&self, id: Uuid) -> StoreResult<Identity> {
        let inner = self.read();
        inner
            .by_id
            .get(&id)
            .map(|&position| inner.identities[position].clone())
            .ok_or(StoreError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.read().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over a consistent snapshot of every enrolled identity.
    pub fn with_identities<R>(&self, f: impl FnOnce(&[Identity]) -> R) -> R {
        f(&self.read().identities)
    }

    // A writer only publishes fully built state, so a poisoned lock still
    // guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn corrupt(path: &Path, message: String) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        message,
    }
}

fn load_identities(path: &Path, shape: &EmbeddingShape) -> StoreResult<Vec<Identity>> {
    if !path.exists() {
        return Ok(vec![]);
    }

    let data = fs::read(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: StoreFile = postcard::from_bytes(&data)
        .map_err(|err| corrupt(path, format!("undecodable contents: {err}")))?;

    if file.version != STORE_VERSION {
        return Err(corrupt(
            path,
            format!("unsupported store version {}", file.version),
        ));
    }
    if file.dimension as usize != shape.dimension {
        return Err(corrupt(
            path,
            format!(
                "store holds {}-value embeddings but {} are configured",
                file.dimension, shape.dimension
            ),
        ));
    }
    for identity in &file.identities {
        shape
            .validate(&identity.embedding)
            .map_err(|err| corrupt(path, format!("identity {}: {err}", identity.id)))?;
    }

    Ok(file.identities)
}

fn write_identities(path: &Path, shape: &EmbeddingShape, identities: &[Identity]) -> StoreResult<()> {
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let data = postcard::to_allocvec(&StoreFileRef {
        version: STORE_VERSION,
        dimension: shape.dimension as u32,
        identities,
    })?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_err)?;

    // NamedTempFile is created 0600, and the rename keeps that mode.
    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(&data).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|err| write_err(err.error))?;

    Ok(())
}
