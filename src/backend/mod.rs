//! Storage adapters behind a [`crate::Service`].

mod memory;

pub use memory::MemoryBackend;

use crate::error::RestError;
use crate::filters::{Condition, FilterTable, PageParam, SortKey};
use crate::schema::{Item, Schema};
use async_trait::async_trait;
use serde_json::Value;

/// What a backend needs to know about the resource it serves.
#[derive(Clone, Debug)]
pub struct ModelInfo {
    pub name: String,
    pub id_attribute: String,
    pub schema: Schema,
}

impl ModelInfo {
    /// Every stored attribute: schema attributes plus the id attribute.
    pub fn attributes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.schema.fields.iter().map(|f| f.attribute_name()).collect();
        if !out.contains(&self.id_attribute.as_str()) {
            out.insert(0, &self.id_attribute);
        }
        out
    }
}

/// One page of results. `total` counts every matching row.
#[derive(Clone, Debug, PartialEq)]
pub struct Pagination {
    pub items: Vec<Item>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

/// A storage engine able to run the generated CRUD operations.
///
/// Conditions are always AND-combined. `update_*` receive the current item as read through
/// [`Backend::read`] and the partially-loaded changes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which operators each field kind supports on this backend.
    fn filter_table(&self) -> FilterTable {
        FilterTable::relational()
    }

    async fn paginate(&self, model: &ModelInfo, param: &PageParam) -> Result<Pagination, RestError>;

    async fn instances(
        &self,
        model: &ModelInfo,
        conditions: &[Condition],
        sort: &[SortKey],
    ) -> Result<Vec<Item>, RestError> {
        let param = PageParam {
            if_page: false,
            conditions: conditions.to_vec(),
            sort: sort.to_vec(),
            ..PageParam::default()
        };
        Ok(self.paginate(model, &param).await?.items)
    }

    async fn read(&self, model: &ModelInfo, id: &Value) -> Result<Option<Item>, RestError>;

    async fn create_one(&self, model: &ModelInfo, item: Item) -> Result<Item, RestError>;

    async fn create_many(&self, model: &ModelInfo, items: Vec<Item>) -> Result<Vec<Item>, RestError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.create_one(model, item).await?);
        }
        Ok(out)
    }

    async fn update_one(&self, model: &ModelInfo, item: Item, changes: Item) -> Result<Item, RestError>;

    async fn update_many(&self, model: &ModelInfo, updates: Vec<(Item, Item)>) -> Result<Vec<Item>, RestError> {
        let mut out = Vec::with_capacity(updates.len());
        for (item, changes) in updates {
            out.push(self.update_one(model, item, changes).await?);
        }
        Ok(out)
    }

    async fn delete_one(&self, model: &ModelInfo, id: &Value) -> Result<(), RestError> {
        self.delete_many(model, std::slice::from_ref(id)).await
    }

    async fn delete_many(&self, model: &ModelInfo, ids: &[Value]) -> Result<(), RestError>;
}
