//! One page of query results

use crate::model::Model;
use quarry_core::JsonValue;

/// Models of one index response plus its pagination envelope
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Models on this page
    pub items: Vec<Model>,
    /// `links` object of a paginated resource response
    pub links: Option<JsonValue>,
    /// `meta` object of a paginated resource response
    pub meta: Option<JsonValue>,
}

impl Page {
    /// Number of models on this page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First model, if any
    pub fn first(&self) -> Option<&Model> {
        self.items.first()
    }

    /// Consume the page into its models
    pub fn into_items(self) -> Vec<Model> {
        self.items
    }

    /// Page number from the pagination meta
    pub fn current_page(&self) -> Option<u64> {
        self.meta_u64("current_page")
    }

    /// Last page number from the pagination meta
    pub fn last_page(&self) -> Option<u64> {
        self.meta_u64("last_page")
    }

    /// Total across all pages
    pub fn total(&self) -> Option<u64> {
        self.meta_u64("total")
    }

    /// Whether a later page exists
    pub fn has_more_pages(&self) -> bool {
        match (self.current_page(), self.last_page()) {
            (Some(current), Some(last)) => current < last,
            _ => self
                .links
                .as_ref()
                .and_then(|links| links.get("next"))
                .is_some_and(|next| !next.is_null()),
        }
    }

    fn meta_u64(&self, key: &str) -> Option<u64> {
        self.meta.as_ref()?.get(key)?.as_u64()
    }

    /// Point every pagination URL at `base`, keeping each URL's query string
    pub fn replace_links(&mut self, base: &str) {
        if let Some(JsonValue::Object(links)) = self.links.as_mut() {
            for url in links.values_mut() {
                rewrite(url, base);
            }
        }
        if let Some(JsonValue::Object(meta)) = self.meta.as_mut() {
            meta.insert("path".to_string(), JsonValue::String(base.to_string()));
            if let Some(JsonValue::Array(entries)) = meta.get_mut("links") {
                for entry in entries {
                    if let Some(url) = entry.get_mut("url") {
                        rewrite(url, base);
                    }
                }
            }
        }
    }
}

fn rewrite(url: &mut JsonValue, base: &str) {
    if let JsonValue::String(current) = url {
        let query = current.find('?').map_or("", |at| &current[at..]);
        *url = JsonValue::String(format!("{}{}", base, query));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replace_links_keeps_query() {
        let mut page = Page {
            items: Vec::new(),
            links: Some(json!({
                "first": "https://api.test/api/posts?page=1",
                "next": "https://api.test/api/posts?page=3&per_page=15",
                "prev": null
            })),
            meta: Some(json!({
                "current_page": 2,
                "last_page": 4,
                "path": "https://api.test/api/posts",
                "links": [{"url": "https://api.test/api/posts?page=1", "label": "1"}, {"url": null}]
            })),
        };
        page.replace_links("/posts");

        let links = page.links.clone().unwrap();
        assert_eq!(links["first"], json!("/posts?page=1"));
        assert_eq!(links["next"], json!("/posts?page=3&per_page=15"));
        assert_eq!(links["prev"], JsonValue::Null);

        let meta = page.meta.clone().unwrap();
        assert_eq!(meta["path"], json!("/posts"));
        assert_eq!(meta["links"][0]["url"], json!("/posts?page=1"));
        assert!(page.has_more_pages());
    }

    #[test]
    fn test_has_more_pages_from_links() {
        let page = Page {
            items: Vec::new(),
            links: Some(json!({"next": null})),
            meta: None,
        };
        assert!(!page.has_more_pages());
        assert_eq!(page.total(), None);
    }
}
