use std::collections::HashMap;

use serde::Deserialize;

use crate::models::WorkItem;

const PARENT_RELATION: &str = "System.LinkTypes.Hierarchy-Reverse";

/// Work item as returned by `_apis/wit/workitems/{id}?$expand=all`.
#[derive(Debug, Deserialize)]
pub struct AzureWorkItem {
    pub id: u64,
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(rename = "_links", default)]
    pub links: Option<WorkItemLinks>,
}

#[derive(Debug, Deserialize)]
pub struct Relation {
    pub rel: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkItemLinks {
    pub html: Option<Href>,
}

#[derive(Debug, Deserialize)]
pub struct Href {
    pub href: String,
}

impl AzureWorkItem {
    fn field(&self, name: &str) -> String {
        self.fields
            .get(name)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned()
    }

    /// `System.Parent` when present, otherwise the reverse hierarchy link.
    fn parent_id(&self) -> Option<u64> {
        self.fields
            .get("System.Parent")
            .and_then(serde_json::Value::as_u64)
            .or_else(|| {
                self.relations
                    .iter()
                    .find(|r| r.rel == PARENT_RELATION)
                    .and_then(|r| r.url.rsplit('/').next())
                    .and_then(|id| id.parse().ok())
            })
    }

    pub fn into_work_item(self, fallback_url: String) -> WorkItem {
        let parent_id = self.parent_id();
        // Full area path; team mappings decide how it is displayed.
        let team = self.field("System.AreaPath");
        let url = self
            .links
            .as_ref()
            .and_then(|l| l.html.as_ref())
            .map_or(fallback_url, |h| h.href.clone());

        WorkItem {
            id: self.id,
            title: self.field("System.Title"),
            work_item_type: self.field("System.WorkItemType"),
            state: self.field("System.State"),
            url,
            team,
            parent_id,
        }
    }
}
