//! HasOne and HasMany: the related side holds the foreign key

use super::RelationBase;
use crate::builder::Builder;
use crate::error::Result;
use crate::model::{Items, Model};
use quarry_core::JsonValue;
use serde_json::Map;

relation_struct! {
    /// One related model whose foreign key equals the parent key
    HasOne
}

relation_struct! {
    /// Related models whose foreign key equals the parent key
    HasMany
}

/// Declared key, else the inverse BelongsTo's key, else `{inverse}_id`
fn foreign_key(base: &RelationBase) -> Result<String> {
    if let Some(key) = &base.definition().foreign_key {
        return Ok(key.clone());
    }
    let inverse = base.guess_inverse_relation()?;
    let related = base.related_type()?;
    Ok(related
        .schema
        .relations
        .get(&inverse)
        .and_then(|d| d.foreign_key.clone())
        .unwrap_or_else(|| format!("{}_id", inverse)))
}

fn query(base: &RelationBase) -> Result<Builder> {
    let column = foreign_key(base)?;
    base.new_query()?
        .where_eq(&column, base.parent_key()?)?
        .lock_filter(&column)
}

fn constraint(base: &RelationBase) -> Result<Map<String, JsonValue>> {
    let mut columns = Map::new();
    columns.insert(foreign_key(base)?, base.parent_key()?);
    Ok(columns)
}

impl HasOne {
    /// Column on the child holding the parent key
    pub fn get_foreign_key(&self) -> Result<String> {
        foreign_key(self)
    }

    /// Query scoped to this parent
    pub fn query(&self) -> Result<Builder> {
        query(self)
    }

    /// Fetch and load the related model
    pub async fn get(&self) -> Result<Option<Model>> {
        Ok(self.load(self.query()?).await?.into_one())
    }

    /// Set the child's foreign key, save it and keep it as the loaded item
    pub async fn save(&self, child: &Model) -> Result<()> {
        self.save_child(child, constraint(self)?).await?;
        self.store_items(Items::One(Some(child.clone())));
        Ok(())
    }
}

impl HasMany {
    /// Column on the children holding the parent key
    pub fn get_foreign_key(&self) -> Result<String> {
        foreign_key(self)
    }

    /// Query scoped to this parent
    pub fn query(&self) -> Result<Builder> {
        query(self)
    }

    /// Fetch and load the related models
    pub async fn get(&self) -> Result<Vec<Model>> {
        Ok(self.load(self.query()?).await?.into_many())
    }

    /// Save one child under the parent
    pub async fn save(&self, child: &Model) -> Result<()> {
        self.save_many(std::slice::from_ref(child)).await
    }

    /// Save children and reflect them in loaded items
    pub async fn save_many(&self, children: &[Model]) -> Result<()> {
        let columns = constraint(self)?;
        for child in children {
            self.save_child(child, columns.clone()).await?;
        }
        self.after_write(children, || self.query()).await
    }

    /// Save children without touching loaded items.
    ///
    /// The relation is marked stale so the next non-quiet write re-fetches.
    pub async fn save_many_quietly(&self, children: &[Model]) -> Result<()> {
        let columns = constraint(self)?;
        for child in children {
            self.save_child(child, columns.clone()).await?;
        }
        self.mark_stale();
        Ok(())
    }
}
