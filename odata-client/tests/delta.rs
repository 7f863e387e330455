mod common;

use common::{MockTransport, client, json_response};
use odata_client::ODataError;
use odata_client::api::query::QueryBuilder;
use serde_json::json;

#[tokio::test]
async fn test_track_changes_partitions_across_pages() {
    let mock = MockTransport::new();
    mock.respond(json_response(json!({
        "@odata.nextLink": "People?$skiptoken=1",
        "value": [{"@id": "People('a')", "UserName": "a"}]
    })));
    mock.respond(json_response(json!({
        "@odata.deltaLink": "People?$deltatoken=abc",
        "value": [
            {"@removed": {"reason": "deleted"}, "@id": "People('b')"},
            {"@id": "People('c')", "UserName": "c"}
        ]
    })));

    let query = QueryBuilder::new("People").build().unwrap();
    let changes = client(&mock, 0).track_changes(&query).await.unwrap();

    assert_eq!(changes.upserts.len(), 2);
    assert_eq!(changes.removals.len(), 1);
    assert_eq!(changes.removals[0].id, "People('b')");
    assert_eq!(changes.removals[0].reason.as_deref(), Some("deleted"));
    assert_eq!(changes.delta_link, "People?$deltatoken=abc");

    let requests = mock.requests();
    assert_eq!(requests[0].get_header("Prefer"), Some("odata.track-changes"));
    assert_eq!(requests[1].get_header("Prefer"), Some("odata.track-changes"));
}

#[tokio::test]
async fn test_track_changes_keeps_existing_preference() {
    let mock = MockTransport::new();
    mock.respond(json_response(json!({"@odata.deltaLink": "d1", "value": []})));

    let query = QueryBuilder::new("People").track_changes().build().unwrap();
    client(&mock, 0).track_changes(&query).await.unwrap();

    let prefers: Vec<_> = mock.requests()[0]
        .headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("Prefer"))
        .cloned()
        .collect();
    assert_eq!(prefers.len(), 1);
}

#[tokio::test]
async fn test_delta_from_link() {
    let mock = MockTransport::new();
    mock.respond(json_response(json!({
        "@odata.deltaLink": "https://host/odata/People?$deltatoken=def",
        "value": []
    })));

    let changes = client(&mock, 0)
        .delta("https://host/odata/People?$deltatoken=abc")
        .await
        .unwrap();
    assert!(changes.is_empty());
    assert_eq!(changes.delta_link, "https://host/odata/People?$deltatoken=def");
    assert_eq!(mock.requests()[0].url, "https://host/odata/People?$deltatoken=abc");
}

#[tokio::test]
async fn test_missing_delta_link_is_protocol_error() {
    let mock = MockTransport::new();
    mock.respond(json_response(json!({"value": [{"Id": 1}]})));

    let err = client(&mock, 0).delta("People?$deltatoken=abc").await.unwrap_err();
    assert!(matches!(err, ODataError::Protocol(_)));
}
