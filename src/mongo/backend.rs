use super::query::{filter_document, id_bson, prepare_document, restore_document, sort_document, ID_KEY};
use crate::backend::{Backend, ModelInfo, Pagination};
use crate::error::RestError;
use crate::filters::{FilterTable, PageParam};
use crate::schema::Item;
use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{Collection, Database};
use serde_json::Value;

/// Serves one resource from one collection. The id attribute is stored as `_id`;
/// items created without an id get a fresh ObjectId.
#[derive(Clone, Debug)]
pub struct MongoBackend {
    database: Database,
    collection: String,
}

impl MongoBackend {
    pub fn new(database: Database, collection: impl Into<String>) -> Self {
        MongoBackend {
            database,
            collection: collection.into(),
        }
    }

    fn get_collection(&self) -> Collection<Document> {
        self.database.collection(&self.collection)
    }

    async fn find(&self, model: &ModelInfo, filter: Document, options: FindOptions) -> Result<Vec<Item>, RestError> {
        tracing::debug!(collection = %self.collection, filter = %filter, "find");
        self.get_collection()
            .find(filter)
            .with_options(options)
            .await?
            .try_collect::<Vec<Document>>()
            .await?
            .into_iter()
            .map(|d| restore_document(model, d))
            .collect()
    }

    fn with_new_id(model: &ModelInfo, mut item: Item) -> Item {
        if item.get(&model.id_attribute).map_or(true, Value::is_null) {
            item.insert(model.id_attribute.clone(), Value::String(ObjectId::new().to_hex()));
        }
        item
    }
}

#[async_trait]
impl Backend for MongoBackend {
    fn filter_table(&self) -> FilterTable {
        FilterTable::document()
    }

    async fn paginate(&self, model: &ModelInfo, param: &PageParam) -> Result<Pagination, RestError> {
        let filter = filter_document(model, &param.conditions)?;
        let mut options = FindOptions::default();
        options.sort = sort_document(model, &param.sort);
        if param.if_page {
            options.limit = Some(i64::from(param.page_size));
            options.skip = Some(param.offset());
        }
        let total = if param.if_page {
            Some(self.get_collection().count_documents(filter.clone()).await?)
        } else {
            None
        };
        let items = self.find(model, filter, options).await?;
        Ok(Pagination {
            total: total.unwrap_or(items.len() as u64),
            items,
            page: param.page,
            page_size: param.page_size,
        })
    }

    async fn read(&self, model: &ModelInfo, id: &Value) -> Result<Option<Item>, RestError> {
        self.get_collection()
            .find_one(doc! { ID_KEY: id_bson(id)? })
            .await?
            .map(|d| restore_document(model, d))
            .transpose()
    }

    async fn create_one(&self, model: &ModelInfo, item: Item) -> Result<Item, RestError> {
        let item = Self::with_new_id(model, item);
        self.get_collection().insert_one(prepare_document(model, &item)?).await?;
        Ok(item)
    }

    async fn create_many(&self, model: &ModelInfo, items: Vec<Item>) -> Result<Vec<Item>, RestError> {
        if items.is_empty() {
            return Ok(items);
        }
        let items: Vec<Item> = items.into_iter().map(|i| Self::with_new_id(model, i)).collect();
        let docs = items
            .iter()
            .map(|i| prepare_document(model, i))
            .collect::<Result<Vec<_>, _>>()?;
        self.get_collection().insert_many(docs).await?;
        Ok(items)
    }

    async fn update_one(&self, model: &ModelInfo, item: Item, mut changes: Item) -> Result<Item, RestError> {
        let id = item.get(&model.id_attribute).cloned().unwrap_or(Value::Null);
        changes.remove(&model.id_attribute);
        if !changes.is_empty() {
            let result = self
                .get_collection()
                .update_one(doc! { ID_KEY: id_bson(&id)? }, doc! { "$set": prepare_document(model, &changes)? })
                .await?;
            if result.matched_count == 0 {
                return Err(RestError::not_found(format!("{} {}", model.name, id)));
            }
        }
        self.read(model, &id)
            .await?
            .ok_or_else(|| RestError::not_found(format!("{} {}", model.name, id)))
    }

    async fn delete_many(&self, _model: &ModelInfo, ids: &[Value]) -> Result<(), RestError> {
        let ids = ids.iter().map(id_bson).collect::<Result<Vec<Bson>, _>>()?;
        let result = self.get_collection().delete_many(doc! { ID_KEY: { "$in": ids } }).await?;
        tracing::debug!(collection = %self.collection, deleted = result.deleted_count, "deleted");
        Ok(())
    }
}
