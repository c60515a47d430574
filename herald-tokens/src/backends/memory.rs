use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{PushToken, StoreError, TokenId, TokenQuery, store::TokenStore};

/// In-memory token store
///
/// Records live in a `HashMap` behind an `RwLock`. Intended for tests and for
/// embedding applications that keep tokens elsewhere and only need a working
/// set in process.
///
/// # Performance
/// - Insert / update: O(1)
/// - Find / delete: O(n) scan plus a sort of the matches
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    pub(crate) tokens: Arc<RwLock<HashMap<TokenId, PushToken>>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, active or not
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a record by id, bypassing the query interface
    #[must_use]
    pub fn get(&self, id: &TokenId) -> Option<PushToken> {
        self.tokens
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: PushToken) -> crate::Result<TokenId> {
        let mut tokens = self.tokens.write()?;
        let id = token.id;

        if tokens.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        tokens.insert(id, token);
        Ok(id)
    }

    async fn find(&self, query: &TokenQuery) -> crate::Result<Vec<PushToken>> {
        let mut matches: Vec<_> = self
            .tokens
            .read()?
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();

        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Ok(matches)
    }

    async fn update(&self, token: &PushToken) -> crate::Result<()> {
        let mut tokens = self.tokens.write()?;

        match tokens.get_mut(&token.id) {
            Some(existing) => {
                *existing = token.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(token.id)),
        }
    }

    async fn delete_many(&self, query: &TokenQuery) -> crate::Result<usize> {
        let mut tokens = self.tokens.write()?;
        let before = tokens.len();
        tokens.retain(|_, record| !query.matches(record));
        Ok(before - tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::{Platform, UserType};

    fn token(user: &str, raw: &str) -> PushToken {
        PushToken::new(user, raw, Platform::Android, UserType::Client, Utc::now())
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryTokenStore::new();
        let record = token("alice", "ExponentPushToken[alice-device]");

        let id = store.insert(record.clone()).await.expect("insert");
        assert_eq!(store.len(), 1);

        let found = store.find(&TokenQuery::active().user("alice")).await.expect("find");
        assert_eq!(found, vec![record.clone()]);

        let mut changed = record;
        changed.is_active = false;
        store.update(&changed).await.expect("update");
        assert!(!store.get(&id).expect("record").is_active);

        let removed = store.delete_many(&TokenQuery::inactive()).await.expect("delete");
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryTokenStore::new();
        let record = token("bob", "ExponentPushToken[bob-device]");

        store.insert(record.clone()).await.expect("first insert");
        let err = store.insert(record).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MemoryTokenStore::new();
        let err = store
            .update(&token("carol", "ExponentPushToken[carol]"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_orders_by_registration() {
        let store = MemoryTokenStore::new();
        let now = Utc::now();

        let mut newer = token("dave", "ExponentPushToken[newer]");
        newer.created_at = now;
        let mut older = token("dave", "ExponentPushToken[older]");
        older.created_at = now - TimeDelta::days(3);

        store.insert(newer).await.expect("insert newer");
        store.insert(older).await.expect("insert older");

        let found = store.find(&TokenQuery::all().user("dave")).await.expect("find");
        let raw: Vec<_> = found.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(raw, ["ExponentPushToken[older]", "ExponentPushToken[newer]"]);
    }
}
