use std::collections::HashMap;
use std::sync::Mutex;

use crate::app::AppId;

/// Tracks which plugin has claimed management responsibility for each record.
///
/// The loader owns the registry; records carry only a non-owning plugin name
/// back-reference, so there is no ownership cycle between plugins and apps.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    claims: Mutex<HashMap<AppId, String>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a claim. First claim wins; returns false if the id was already
    /// claimed by another plugin.
    pub fn claim(&self, id: &AppId, plugin: &str) -> bool {
        let mut claims = self.claims.lock().unwrap();
        match claims.get(id) {
            Some(owner) => owner == plugin,
            None => {
                claims.insert(id.clone(), plugin.to_string());
                true
            }
        }
    }

    pub fn owner(&self, id: &AppId) -> Option<String> {
        self.claims.lock().unwrap().get(id).cloned()
    }

    pub fn is_claimed(&self, id: &AppId) -> bool {
        self.claims.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.claims.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_claim_wins() {
        let registry = ClaimRegistry::new();
        let id = AppId::from("dummy::chiron");
        assert!(registry.claim(&id, "dummy"));
        assert!(!registry.claim(&id, "other"));
        assert_eq!(registry.owner(&id).as_deref(), Some("dummy"));
    }

    #[test]
    fn test_reclaim_by_same_plugin_is_idempotent() {
        let registry = ClaimRegistry::new();
        let id = AppId::from("dummy::chiron");
        assert!(registry.claim(&id, "dummy"));
        assert!(registry.claim(&id, "dummy"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unclaimed_lookup() {
        let registry = ClaimRegistry::new();
        assert!(registry.owner(&AppId::from("ghost")).is_none());
        assert!(!registry.is_claimed(&AppId::from("ghost")));
    }
}
