use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Host-provided flow for choosing the API key used by the Pro model.
#[async_trait]
pub trait KeySelector: Send + Sync {
    async fn has_selected_api_key(&self) -> bool;

    /// Opens the host's key picker. Returns once the user is done with it;
    /// whether a key was actually chosen is not reported.
    async fn open_select_key(&self);
}

/// The key-selection collaborator may be missing entirely (headless runs,
/// one-shot invocations). Callers treat that as "assume a key is configured".
#[derive(Clone)]
pub enum KeyCapability {
    Available(Arc<dyn KeySelector>),
    Unavailable,
}

impl KeyCapability {
    pub fn available(selector: impl KeySelector + 'static) -> Self {
        KeyCapability::Available(Arc::new(selector))
    }

    pub fn is_available(&self) -> bool {
        matches!(self, KeyCapability::Available(_))
    }
}

impl std::fmt::Debug for KeyCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyCapability::Available(_) => f.write_str("KeyCapability::Available"),
            KeyCapability::Unavailable => f.write_str("KeyCapability::Unavailable"),
        }
    }
}

/// Key chosen through a [`KeySelector`], shared with the generation client.
#[derive(Clone, Default)]
pub struct ApiKeyStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<String> {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, key: impl Into<String>) {
        let key = key.into();
        let mut guard = self.inner.write().await;
        *guard = if key.trim().is_empty() {
            None
        } else {
            Some(key.trim().to_string())
        };
    }

    pub async fn is_set(&self) -> bool {
        self.inner.read().await.is_some()
    }
}
