//! In-memory access token storage.

use std::sync::{Arc, PoisonError, RwLock};

/// The current access token, shared by every clone of a client.
///
/// Never written to disk; a new process starts signed out and restores the
/// session from the refresh cookie.
#[derive(Clone, Default)]
pub struct AccessTokenStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl AccessTokenStore {
    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: String) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
