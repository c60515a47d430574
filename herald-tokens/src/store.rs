use async_trait::async_trait;

use crate::{PushToken, TokenId, TokenQuery};

/// Persistence boundary for push tokens
///
/// Only the query shapes the lifecycle manager needs are exposed. Backends
/// are free to translate a [`TokenQuery`] into whatever their engine speaks.
#[async_trait]
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Store a new record
    ///
    /// # Errors
    /// If a record with the same id already exists, or the backend fails
    async fn insert(&self, token: PushToken) -> crate::Result<TokenId>;

    /// Fetch every record matching `query`, oldest registration first
    ///
    /// # Errors
    /// If the backend fails
    async fn find(&self, query: &TokenQuery) -> crate::Result<Vec<PushToken>>;

    /// Replace the stored record that has the same id as `token`
    ///
    /// # Errors
    /// If no such record exists, or the backend fails
    async fn update(&self, token: &PushToken) -> crate::Result<()>;

    /// Hard-delete every record matching `query`, returning how many went
    ///
    /// # Errors
    /// If the backend fails
    async fn delete_many(&self, query: &TokenQuery) -> crate::Result<usize>;
}
