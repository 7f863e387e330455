//! Delta-link change tracking

use log::info;
use serde_json::Value;

use super::client::ODataClient;
use super::query::Query;
use crate::error::{ODataError, Result};

/// An entity the service reports as removed since the last delta link
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    /// `@id` of the removed entity
    pub id: String,
    /// `deleted` or `changed`, when the service says
    pub reason: Option<String>,
}

/// Changes since a delta link, partitioned by kind
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeltaResult {
    pub upserts: Vec<Value>,
    pub removals: Vec<Removal>,
    /// Link to request the next round of changes
    pub delta_link: String,
}

impl DeltaResult {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

fn annotation<'a>(entry: &'a Value, name: &str) -> Option<&'a Value> {
    entry
        .get(format!("@{}", name))
        .or_else(|| entry.get(format!("@odata.{}", name)))
}

/// OData 4.0 deleted-entity form: `{"@odata.context": ".../$deletedEntity", "id": ..., "reason": ...}`
fn deleted_entity(entry: &Value) -> Option<Result<Removal>> {
    let context = annotation(entry, "context")?.as_str()?;
    if !context.ends_with("$deletedEntity") {
        return None;
    }
    let removal = entry
        .get("id")
        .and_then(Value::as_str)
        .map(|id| Removal {
            id: id.to_string(),
            reason: entry.get("reason").and_then(Value::as_str).map(str::to_string),
        })
        .ok_or_else(|| ODataError::Protocol("$deletedEntity delta entry without id".to_string()));
    Some(removal)
}

/// Split delta entries into upserts and removals
///
/// An entry is a removal when it carries a `removed` annotation (it must then
/// also carry an `id` annotation naming the entity) or when its context is
/// `$deletedEntity`.
pub fn partition_entries(entries: Vec<Value>) -> Result<(Vec<Value>, Vec<Removal>)> {
    let mut upserts = Vec::new();
    let mut removals = Vec::new();

    for entry in entries {
        if let Some(removal) = deleted_entity(&entry) {
            removals.push(removal?);
            continue;
        }
        let Some(removed) = annotation(&entry, "removed") else {
            upserts.push(entry);
            continue;
        };
        let id = annotation(&entry, "id")
            .and_then(Value::as_str)
            .ok_or_else(|| ODataError::Protocol("removed delta entry without @id".to_string()))?;
        removals.push(Removal {
            id: id.to_string(),
            reason: removed.get("reason").and_then(Value::as_str).map(str::to_string),
        });
    }

    Ok((upserts, removals))
}

impl ODataClient {
    /// Run `query` with change tracking and return all current entities plus
    /// the first delta link
    pub async fn track_changes(&self, query: &Query) -> Result<DeltaResult> {
        let mut headers = query.headers.clone();
        if !headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("Prefer") && v.contains("odata.track-changes"))
        {
            headers.push(("Prefer".to_string(), "odata.track-changes".to_string()));
        }
        self.changes_from(&query.to_url(), &headers).await
    }

    /// Fetch everything that changed since `delta_link`
    ///
    /// Next links are followed sequentially until the page carrying the new
    /// delta link.
    pub async fn delta(&self, delta_link: &str) -> Result<DeltaResult> {
        self.changes_from(delta_link, &[]).await
    }

    async fn changes_from(&self, url: &str, headers: &[(String, String)]) -> Result<DeltaResult> {
        let all = self.follow_pages(url, headers).await?;
        let delta_link = all.delta_link.ok_or_else(|| {
            ODataError::Protocol(format!("change tracking response from {} has no delta link", url))
        })?;
        let (upserts, removals) = partition_entries(all.value)?;
        info!(
            "Delta: {} upserts, {} removals",
            upserts.len(),
            removals.len()
        );
        Ok(DeltaResult {
            upserts,
            removals,
            delta_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partition_by_annotation() {
        let entries = vec![
            json!({"@id": "People('a')", "UserName": "a"}),
            json!({"@removed": {"reason": "deleted"}, "@id": "People('b')"}),
            json!({"@odata.removed": {}, "@odata.id": "People('c')"}),
            json!({"UserName": "d", "Age": 3}),
        ];

        let (upserts, removals) = partition_entries(entries).unwrap();
        assert_eq!(upserts.len(), 2);
        assert_eq!(upserts[0]["UserName"], "a");
        assert_eq!(
            removals,
            vec![
                Removal {
                    id: "People('b')".to_string(),
                    reason: Some("deleted".to_string())
                },
                Removal {
                    id: "People('c')".to_string(),
                    reason: None
                },
            ]
        );
    }

    #[test]
    fn test_deleted_entity_context() {
        let entries = vec![
            json!({
                "@odata.context": "https://host/odata/$metadata#People/$deletedEntity",
                "id": "People('b')",
                "reason": "deleted"
            }),
            json!({"@odata.context": "$metadata#People/$entity", "UserName": "a"}),
        ];

        let (upserts, removals) = partition_entries(entries).unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(
            removals,
            vec![Removal {
                id: "People('b')".to_string(),
                reason: Some("deleted".to_string())
            }]
        );

        let err = partition_entries(vec![json!({"@odata.context": "#People/$deletedEntity"})])
            .unwrap_err();
        assert!(matches!(err, ODataError::Protocol(_)));
    }

    #[test]
    fn test_removed_without_id_is_protocol_error() {
        let err = partition_entries(vec![json!({"@removed": {}})]).unwrap_err();
        assert!(matches!(err, ODataError::Protocol(_)));
    }
}
