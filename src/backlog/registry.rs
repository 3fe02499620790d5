//! Device token registry updated from dispatch reports

use dashmap::DashSet;

use crate::notification::DeviceToken;

/// Store of known device tokens owned by the application.
///
/// The backlog prunes tokens the gateway reports invalid and swaps in
/// canonical tokens it reports as rotated.
pub trait TokenRegistry: Send + Sync {
    fn remove(&self, token: &DeviceToken);

    fn replace(&self, old: &DeviceToken, new: &DeviceToken);
}

/// In-memory token registry
#[derive(Debug, Default)]
pub struct MemoryTokenRegistry {
    tokens: DashSet<DeviceToken>,
}

impl MemoryTokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: DeviceToken) {
        self.tokens.insert(token);
    }

    pub fn contains(&self, token: &DeviceToken) -> bool {
        self.tokens.contains(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<T: Into<DeviceToken>> FromIterator<T> for MemoryTokenRegistry {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let registry = Self::new();
        for token in iter {
            registry.insert(token.into());
        }
        registry
    }
}

impl TokenRegistry for MemoryTokenRegistry {
    fn remove(&self, token: &DeviceToken) {
        if self.tokens.remove(token).is_some() {
            tracing::debug!(token = %token, "Removed invalid device token");
        }
    }

    fn replace(&self, old: &DeviceToken, new: &DeviceToken) {
        self.tokens.remove(old);
        self.tokens.insert(new.clone());
        tracing::debug!(old = %old, new = %new, "Replaced rotated device token");
    }
}
