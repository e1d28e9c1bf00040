//! BelongsTo: the parent holds the foreign key

use crate::builder::Builder;
use crate::error::Result;
use crate::model::{Items, Model};
use quarry_core::JsonValue;
use serde_json::Map;

relation_struct! {
    /// Parent's `{name}_id` points at one related model
    BelongsTo
}

impl BelongsTo {
    /// Column on the parent, `{relation}_id` unless declared
    pub fn get_foreign_key(&self) -> Result<String> {
        Ok(self
            .definition()
            .foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.name())))
    }

    /// Primary key of the related type
    pub fn get_owner_key(&self) -> Result<String> {
        Ok(self.related_type()?.schema.require_primary_key()?.to_string())
    }

    fn foreign_value(&self) -> Result<JsonValue> {
        Ok(self
            .parent()
            .raw(&self.get_foreign_key()?)
            .unwrap_or(JsonValue::Null))
    }

    /// Query for the owner, scoped to the parent's foreign key
    pub fn query(&self) -> Result<Builder> {
        let owner_key = self.get_owner_key()?;
        self.new_query()?
            .where_eq(&owner_key, self.foreign_value()?)?
            .lock_filter(&owner_key)
    }

    /// Related model; a null foreign key resolves to `None` without a request
    pub async fn get(&self) -> Result<Option<Model>> {
        if self.foreign_value()?.is_null() {
            self.store_items(Items::One(None));
            return Ok(None);
        }
        Ok(self.load(self.query()?).await?.into_one())
    }

    /// Point the parent at `item` and save the parent
    pub async fn associate(&self, item: &Model) -> Result<()> {
        self.check_related(item)?;
        let mut columns = Map::new();
        columns.insert(self.get_foreign_key()?, self.related_key(item)?);
        self.write_parent(columns, Items::One(Some(item.clone()))).await
    }

    /// Clear the parent's foreign key and save the parent
    pub async fn dissociate(&self) -> Result<()> {
        let mut columns = Map::new();
        columns.insert(self.get_foreign_key()?, JsonValue::Null);
        self.write_parent(columns, Items::One(None)).await
    }
}
