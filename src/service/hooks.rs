//! Extension points run around every write.

use crate::error::RestError;
use crate::schema::Item;
use async_trait::async_trait;
use serde_json::Value;

/// Hooks run by [`crate::Service`] around writes. `before_*` may modify the loaded items or
/// abort with an error; `after_*` see what the backend returned.
#[async_trait]
pub trait ServiceHooks: Send + Sync {
    /// Items are keyed by attribute. Values set here are coerced and validated
    /// through the schema afterwards, like request values.
    async fn before_create(&self, _items: &mut [Item]) -> Result<(), RestError> {
        Ok(())
    }

    async fn after_create(&self, _items: &[Item]) -> Result<(), RestError> {
        Ok(())
    }

    /// `items` are the current rows; `changes` the partial updates at the same index.
    async fn before_update(&self, _items: &[Item], _changes: &mut [Item]) -> Result<(), RestError> {
        Ok(())
    }

    async fn after_update(&self, _items: &[Item]) -> Result<(), RestError> {
        Ok(())
    }

    async fn before_delete(&self, _ids: &[Value]) -> Result<(), RestError> {
        Ok(())
    }

    async fn after_delete(&self, _ids: &[Value]) -> Result<(), RestError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

#[async_trait]
impl ServiceHooks for NoHooks {}
