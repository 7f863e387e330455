mod common;

use common::{MockTransport, client, json_response};
use odata_client::ODataError;
use odata_client::api::{HttpResponse, Method};
use serde::Deserialize;
use serde_json::json;

#[tokio::test]
async fn test_update_sends_if_match() {
    let mock = MockTransport::new();
    mock.respond(HttpResponse::new(204));

    client(&mock, 0)
        .update("Products(1)", json!({"Price": 2}), Some("W/\"v1\""))
        .await
        .unwrap();

    let request = &mock.requests()[0];
    assert_eq!(request.method, Method::Patch);
    assert_eq!(request.url, "https://host/odata/Products(1)");
    assert_eq!(request.get_header("If-Match"), Some("W/\"v1\""));
    assert_eq!(request.body.as_deref(), Some("{\"Price\":2}"));
}

#[tokio::test]
async fn test_precondition_failed_reports_both_etags() {
    let mock = MockTransport::new();
    mock.respond(HttpResponse::new(412).with_header("ETag", "W/\"v2\""));

    let err = client(&mock, 3)
        .update("Products(1)", json!({"Price": 2}), Some("W/\"v1\""))
        .await
        .unwrap_err();

    match err {
        ODataError::ConcurrencyConflict {
            url,
            request_etag,
            current_etag,
        } => {
            assert_eq!(url, "https://host/odata/Products(1)");
            assert_eq!(request_etag, "W/\"v1\"");
            assert_eq!(current_etag.as_deref(), Some("W/\"v2\""));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_precondition_failed_reads_current_etag() {
    let mock = MockTransport::new();
    mock.respond(HttpResponse::new(412));
    mock.respond(json_response(json!({"@odata.etag": "W/\"v2\"", "Id": 1})));

    let err = client(&mock, 0)
        .delete("Products(1)", Some("W/\"v1\""))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ODataError::ConcurrencyConflict { ref current_etag, .. } if current_etag.as_deref() == Some("W/\"v2\"")
    ));
    let requests = mock.requests();
    assert_eq!(requests[0].method, Method::Delete);
    assert_eq!(requests[1].method, Method::Get);
    assert_eq!(requests[1].url, requests[0].url);
}

#[tokio::test]
async fn test_precondition_failed_without_etag_is_client_error() {
    let mock = MockTransport::new();
    mock.respond(HttpResponse::new(412));

    let err = client(&mock, 0).delete("Products(1)", None).await.unwrap_err();
    assert!(matches!(err, ODataError::Client { status: 412, .. }));
}

#[tokio::test]
async fn test_get_with_etag() {
    #[derive(Debug, Deserialize)]
    struct Product {
        #[serde(rename = "Id")]
        id: i64,
    }

    let mock = MockTransport::new();
    mock.respond(json_response(json!({"Id": 7, "Name": "Lamp"})).with_header("ETag", "W/\"5\""));

    let tagged = client(&mock, 0)
        .get_with_etag::<Product>("Products(7)")
        .await
        .unwrap();
    assert_eq!(tagged.value.id, 7);
    assert_eq!(tagged.etag.as_deref(), Some("W/\"5\""));
}

#[tokio::test]
async fn test_get_with_etag_rejects_collection() {
    let mock = MockTransport::new();
    mock.respond(json_response(json!({"value": [{"Id": 1}, {"Id": 2}]})));

    let err = client(&mock, 0)
        .get_with_etag::<serde_json::Value>("Products")
        .await
        .unwrap_err();
    assert!(matches!(err, ODataError::Protocol(ref m) if m.contains("single entity")));
}
