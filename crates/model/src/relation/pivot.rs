//! Pivot relations: BelongsToMany and MorphToMany
//!
//! Pivot writes go to `{parent route_base}.{relation}.{attach|detach|sync}`
//! keyed by the parent, with a body of `{ids, pivot?, detaching?}`. Every
//! write has a quiet variant that only marks the relation stale.
//!
//! Non-quiet writes patch loaded items locally when they can: instances
//! passed as [`RelatedRef::Model`] are added, keys are removed. A bare key
//! that is not loaded yet, or a stale relation, triggers a re-fetch instead.
//! Concurrent writes resolve last-completion-wins.

use super::{has_key, RelatedRef, RelationBase};
use crate::builder::Builder;
use crate::error::{Operation, Result};
use crate::model::{Items, Model};
use crate::service::Call;
use quarry_core::JsonValue;
use serde_json::Map;
use tracing::debug;

relation_struct! {
    /// Many-to-many through a pivot table
    BelongsToMany
}

relation_struct! {
    /// Polymorphic many-to-many through a pivot table
    MorphToMany
}

/// Declared key, else the inverse relation's name
fn foreign_key(base: &RelationBase) -> Result<String> {
    match &base.definition().foreign_key {
        Some(key) => Ok(key.clone()),
        None => base.guess_inverse_relation(),
    }
}

fn query(base: &RelationBase) -> Result<Builder> {
    let column = foreign_key(base)?;
    base.new_query()?
        .where_eq(&column, base.parent_key()?)?
        .lock_filter(&column)
}

fn action(operation: Operation) -> &'static str {
    match operation {
        Operation::Attach => "attach",
        Operation::Detach => "detach",
        _ => "sync",
    }
}

/// Send one pivot write and reconcile loaded items
async fn write(
    base: &RelationBase,
    operation: Operation,
    refs: Vec<RelatedRef>,
    pivot: Option<JsonValue>,
    quiet: bool,
) -> Result<()> {
    let parent = base.parent();
    let parent_key = base.parent_key()?;

    let mut ids = Vec::with_capacity(refs.len());
    for related in &refs {
        ids.push(match related {
            RelatedRef::Model(model) => {
                base.check_related(model)?;
                base.related_key(model)?
            }
            RelatedRef::Key(key) => key.clone(),
        });
    }

    let mut body = Map::new();
    body.insert("ids".to_string(), JsonValue::Array(ids.clone()));
    if let Some(pivot) = pivot {
        body.insert("pivot".to_string(), pivot);
    }
    if operation == Operation::Sync {
        body.insert("detaching".to_string(), JsonValue::Bool(true));
    }

    let schema = parent.schema();
    let mut call = Call::new(
        operation,
        format!("{}.{}.{}", schema.route_base(), base.name(), action(operation)),
    )
    .data(JsonValue::Object(body))
    .model(parent.model_type());
    if let Some(key) = quarry_http::query_value(&parent_key) {
        call = call.param(schema.route_key(), key);
    }
    if let Err(e) = parent.service().send(call).await {
        return Err(parent.fail(operation, e));
    }

    if quiet {
        base.mark_stale();
        return Ok(());
    }
    if parent.relation_stale(base.name()) {
        base.load(query(base)?).await?;
        return Ok(());
    }

    let mut refetch = false;
    parent.patch_relation(base.name(), |items| {
        if let Items::Many(list) = items {
            refetch = patch(list, operation, &refs, &ids);
        }
    });
    if refetch {
        debug!(
            target: "quarry::relation",
            relation = %base.name(),
            %operation,
            "Re-fetching pivot relation"
        );
        base.load(query(base)?).await?;
    }
    Ok(())
}

/// Apply a pivot write to loaded items; returns true when a re-fetch is needed
fn patch(list: &mut Vec<Model>, operation: Operation, refs: &[RelatedRef], ids: &[JsonValue]) -> bool {
    let mut refetch = false;
    match operation {
        Operation::Detach if ids.is_empty() => list.clear(),
        Operation::Detach => list.retain(|item| !ids.iter().any(|id| has_key(item, id))),
        _ => {
            if operation == Operation::Sync {
                list.retain(|item| ids.iter().any(|id| has_key(item, id)));
            }
            for (related, id) in refs.iter().zip(ids) {
                if list.iter().any(|item| has_key(item, id)) {
                    continue;
                }
                match related {
                    RelatedRef::Model(model) => list.push(model.clone()),
                    RelatedRef::Key(_) => refetch = true,
                }
            }
        }
    }
    refetch
}

macro_rules! pivot_methods {
    ($name:ident) => {
        impl $name {
            /// Column constrained by this relation's queries
            pub fn get_foreign_key(&self) -> Result<String> {
                foreign_key(self)
            }

            /// Query for the attached models
            pub fn query(&self) -> Result<Builder> {
                query(self)
            }

            /// Fetch and load the attached models
            pub async fn get(&self) -> Result<Vec<Model>> {
                Ok(self.load(self.query()?).await?.into_many())
            }

            /// Attach `related` and reload
            pub async fn attach<I, R>(&self, related: I) -> Result<()>
            where
                I: IntoIterator<Item = R>,
                R: Into<RelatedRef>,
            {
                write(self, Operation::Attach, refs(related), None, false).await
            }

            /// Attach without touching loaded items
            pub async fn attach_quietly<I, R>(&self, related: I) -> Result<()>
            where
                I: IntoIterator<Item = R>,
                R: Into<RelatedRef>,
            {
                write(self, Operation::Attach, refs(related), None, true).await
            }

            /// Detach `related`; an empty list detaches everything
            pub async fn detach<I, R>(&self, related: I) -> Result<()>
            where
                I: IntoIterator<Item = R>,
                R: Into<RelatedRef>,
            {
                write(self, Operation::Detach, refs(related), None, false).await
            }

            /// Detach without touching loaded items
            pub async fn detach_quietly<I, R>(&self, related: I) -> Result<()>
            where
                I: IntoIterator<Item = R>,
                R: Into<RelatedRef>,
            {
                write(self, Operation::Detach, refs(related), None, true).await
            }

            /// Make `related` the exact set of attached models
            pub async fn sync<I, R>(&self, related: I) -> Result<()>
            where
                I: IntoIterator<Item = R>,
                R: Into<RelatedRef>,
            {
                write(self, Operation::Sync, refs(related), None, false).await
            }

            /// Sync without touching loaded items
            pub async fn sync_quietly<I, R>(&self, related: I) -> Result<()>
            where
                I: IntoIterator<Item = R>,
                R: Into<RelatedRef>,
            {
                write(self, Operation::Sync, refs(related), None, true).await
            }

            /// Sync, writing the same pivot columns on every attached row
            pub async fn sync_with_pivot_values<I, R>(&self, related: I, pivot: JsonValue) -> Result<()>
            where
                I: IntoIterator<Item = R>,
                R: Into<RelatedRef>,
            {
                write(self, Operation::Sync, refs(related), Some(pivot), false).await
            }

            /// Sync with pivot values, without touching loaded items
            pub async fn sync_with_pivot_values_quietly<I, R>(&self, related: I, pivot: JsonValue) -> Result<()>
            where
                I: IntoIterator<Item = R>,
                R: Into<RelatedRef>,
            {
                write(self, Operation::Sync, refs(related), Some(pivot), true).await
            }
        }
    };
}

fn refs<I, R>(related: I) -> Vec<RelatedRef>
where
    I: IntoIterator<Item = R>,
    R: Into<RelatedRef>,
{
    related.into_iter().map(Into::into).collect()
}

pivot_methods!(BelongsToMany);
pivot_methods!(MorphToMany);
