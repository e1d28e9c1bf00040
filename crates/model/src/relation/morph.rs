//! Polymorphic relations: MorphOne, MorphMany and MorphTo
//!
//! The related side of a MorphOne/MorphMany stores the parent key in
//! `{morph}_id` and the parent's morph class in `{morph}_type`. A MorphTo
//! reads its own pair to find the target, so the related type is known only
//! per instance.

use super::RelationBase;
use crate::builder::Builder;
use crate::error::Result;
use crate::model::{Items, Model};
use quarry_core::JsonValue;
use serde_json::Map;

relation_struct! {
    /// One related model pointing back through a morph pair
    MorphOne
}

relation_struct! {
    /// Related models pointing back through a morph pair
    MorphMany
}

relation_struct! {
    /// Target chosen per instance by `{name}_type`
    MorphTo
}

/// Prefix of the morph pair: declared morph name, else the inverse relation
fn morph_name(base: &RelationBase) -> Result<String> {
    match &base.definition().morph_name {
        Some(name) => Ok(name.clone()),
        None => base.guess_inverse_relation(),
    }
}

fn query(base: &RelationBase) -> Result<Builder> {
    let morph = morph_name(base)?;
    let id_column = format!("{}_id", morph);
    let type_column = format!("{}_type", morph);
    base.new_query()?
        .where_eq(&id_column, base.parent_key()?)?
        .where_eq(&type_column, base.parent().schema().morph_class())?
        .lock_filter(&id_column)?
        .lock_filter(&type_column)
}

fn constraint(base: &RelationBase) -> Result<Map<String, JsonValue>> {
    let morph = morph_name(base)?;
    let mut columns = Map::new();
    columns.insert(format!("{}_id", morph), base.parent_key()?);
    columns.insert(
        format!("{}_type", morph),
        JsonValue::String(base.parent().schema().morph_class().to_string()),
    );
    Ok(columns)
}

impl MorphOne {
    /// `{name}_id` on the child
    pub fn get_foreign_key(&self) -> Result<String> {
        Ok(format!("{}_id", morph_name(self)?))
    }

    /// `{name}_type` on the child
    pub fn get_morph_type(&self) -> Result<String> {
        Ok(format!("{}_type", morph_name(self)?))
    }

    /// Query scoped to this parent
    pub fn query(&self) -> Result<Builder> {
        query(self)
    }

    /// Fetch and load the related model
    pub async fn get(&self) -> Result<Option<Model>> {
        Ok(self.load(self.query()?).await?.into_one())
    }

    /// Write the morph pair on `child`, save it and keep it loaded
    pub async fn save(&self, child: &Model) -> Result<()> {
        self.save_child(child, constraint(self)?).await?;
        self.store_items(Items::One(Some(child.clone())));
        Ok(())
    }
}

impl MorphMany {
    /// `{name}_id` on the children
    pub fn get_foreign_key(&self) -> Result<String> {
        Ok(format!("{}_id", morph_name(self)?))
    }

    /// `{name}_type` on the children
    pub fn get_morph_type(&self) -> Result<String> {
        Ok(format!("{}_type", morph_name(self)?))
    }

    /// Query scoped to this parent
    pub fn query(&self) -> Result<Builder> {
        query(self)
    }

    /// Fetch and load the related models
    pub async fn get(&self) -> Result<Vec<Model>> {
        Ok(self.load(self.query()?).await?.into_many())
    }

    /// Save one child
    pub async fn save(&self, child: &Model) -> Result<()> {
        self.save_many(std::slice::from_ref(child)).await
    }

    /// Save children and refresh the loaded items
    pub async fn save_many(&self, children: &[Model]) -> Result<()> {
        let columns = constraint(self)?;
        for child in children {
            self.save_child(child, columns.clone()).await?;
        }
        self.after_write(children, || self.query()).await
    }

    /// Save children without touching loaded items; marks the relation stale
    pub async fn save_many_quietly(&self, children: &[Model]) -> Result<()> {
        let columns = constraint(self)?;
        for child in children {
            self.save_child(child, columns.clone()).await?;
        }
        self.mark_stale();
        Ok(())
    }
}

impl MorphTo {
    /// `{name}_id` unless declared
    pub fn get_foreign_key(&self) -> Result<String> {
        Ok(self
            .definition()
            .foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.name())))
    }

    /// `{name}_type` on the parent
    pub fn get_morph_type(&self) -> String {
        format!("{}_type", self.name())
    }

    /// Concrete related type, read from this instance's `{name}_type`
    pub fn get_related(&self) -> Result<String> {
        self.related_model()
    }

    fn foreign_value(&self) -> Result<JsonValue> {
        Ok(self
            .parent()
            .raw(&self.get_foreign_key()?)
            .unwrap_or(JsonValue::Null))
    }

    /// Query for the owner named by the morph pair
    pub fn query(&self) -> Result<Builder> {
        let related = self.related_type()?;
        let owner_key = related.schema.require_primary_key()?.to_string();
        self.new_query()?
            .where_eq(&owner_key, self.foreign_value()?)?
            .lock_filter(&owner_key)
    }

    /// Target model; `None` without a request when the pair is unset
    pub async fn get(&self) -> Result<Option<Model>> {
        if self.parent().morph_type_of(self.name()).is_none() || self.foreign_value()?.is_null() {
            self.store_items(Items::One(None));
            return Ok(None);
        }
        Ok(self.load(self.query()?).await?.into_one())
    }

    /// Point the parent at `item` (saving `item` first if new) and save the parent
    pub async fn associate(&self, item: &Model) -> Result<()> {
        if !item.exists() {
            item.save().await?;
        }
        let key = self.related_key(item)?;
        let mut columns = Map::new();
        columns.insert(self.get_foreign_key()?, key);
        columns.insert(
            self.get_morph_type(),
            JsonValue::String(item.schema().morph_class().to_string()),
        );
        self.write_parent(columns, Items::One(Some(item.clone()))).await
    }

    /// Clear the morph pair and save the parent
    pub async fn dissociate(&self) -> Result<()> {
        let mut columns = Map::new();
        columns.insert(self.get_foreign_key()?, JsonValue::Null);
        columns.insert(self.get_morph_type(), JsonValue::Null);
        self.write_parent(columns, Items::One(None)).await
    }
}
