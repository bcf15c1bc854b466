//! Round-robin cookie rotation

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{BridgeError, Result};

/// An opaque backend cookie; `Debug` never prints the value
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Credential(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

/// Hands out credentials from a fixed pool in cyclic order
///
/// The cursor always holds the index of the next credential. Reading and
/// advancing it is one atomic update, so concurrent callers each get exactly
/// one credential and the order stays cyclic for any pool size.
#[derive(Debug)]
pub struct CredentialRotator {
    pool: Vec<Credential>,
    cursor: AtomicUsize,
}

impl CredentialRotator {
    pub fn new<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pool: Vec<Credential> = values.into_iter().map(Credential::new).collect();
        if pool.is_empty() {
            return Err(BridgeError::Config(
                "Credential pool cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            pool,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn next(&self) -> Credential {
        let len = self.pool.len();
        let index = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        self.pool[index % len].clone()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
