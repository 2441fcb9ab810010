//! Issues and checks the identity tokens clients present when connecting.
//!
//! A token is `"<user id>.<mac>"` where the mac is a keyed BLAKE3 hash of the
//! id. Without a configured secret a random key is drawn at startup, so
//! tokens only survive as long as the process.
//!
//! With a secret, tokens outlive the process and user ids must never be
//! handed out twice. A [`UserIndex`] file remembers how far ids have been
//! reserved; ids are reserved in blocks so the file is rewritten once per
//! [`ID_BLOCK`] identities rather than on every handshake.

use crate::error::{Result, ServerError};
use log::{debug, error, info};
use shared::UserId;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

const KEY_CONTEXT: &str = "crowdle 2024-05 identity token";

/// Identities reserved per write of the index file.
pub const ID_BLOCK: UserId = 256;

/// Persistent high-water mark of issued user ids.
pub struct UserIndex {
    path: PathBuf,
    /// Every id below this value is recorded as used.
    reserved: Mutex<UserId>,
}

impl UserIndex {
    /// Opens the index, treating a missing file as a fresh start.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let reserved = match fs::read_to_string(&path) {
            Ok(contents) => contents.trim().parse::<UserId>().map_err(|e| {
                ServerError::Config(format!(
                    "corrupt user index {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => 1,
            Err(e) => return Err(e.into()),
        };
        info!("User ids continue from {} ({})", reserved, path.display());

        Ok(Self {
            path,
            reserved: Mutex::new(reserved.max(1)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First id this index allows to be issued.
    pub fn first_free(&self) -> UserId {
        *self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes sure `user` is covered by the stored reservation.
    fn reserve(&self, user: UserId) {
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        if user < *reserved {
            return;
        }

        let next = user.saturating_add(ID_BLOCK);
        match fs::write(&self.path, next.to_string()) {
            Ok(()) => {
                debug!("Reserved user ids up to {}", next);
                *reserved = next;
            }
            Err(e) => error!(
                "Failed to store user index {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

pub struct TokenAuthority {
    key: [u8; 32],
    next_user: AtomicU32,
    index: Option<UserIndex>,
}

impl TokenAuthority {
    pub fn new(secret: Option<&str>) -> Self {
        Self::build(secret, None)
    }

    /// Authority whose user ids continue from `index` across restarts.
    pub fn with_index(secret: Option<&str>, index: UserIndex) -> Self {
        Self::build(secret, Some(index))
    }

    fn build(secret: Option<&str>, index: Option<UserIndex>) -> Self {
        let key = match secret {
            Some(secret) => blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
            None => rand::random(),
        };
        let first = index.as_ref().map_or(1, UserIndex::first_free);
        Self {
            key,
            next_user: AtomicU32::new(first),
            index,
        }
    }

    fn mac(&self, user: UserId) -> blake3::Hash {
        blake3::keyed_hash(&self.key, &user.to_be_bytes())
    }

    /// Creates a fresh identity.
    pub fn issue(&self) -> (String, UserId) {
        let user = self.next_user.fetch_add(1, Ordering::Relaxed);
        if let Some(index) = &self.index {
            index.reserve(user);
        }
        debug!("Issued identity {}", user);
        (format!("{}.{}", user, self.mac(user).to_hex()), user)
    }

    pub fn validate(&self, token: &str) -> Option<UserId> {
        let (id, mac) = token.split_once('.')?;
        let user: UserId = id.parse().ok()?;
        let mac = blake3::Hash::from_hex(mac).ok()?;
        // Hash equality is constant time.
        (mac == self.mac(user)).then_some(user)
    }
}
