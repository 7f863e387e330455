mod common;

use common::{MockTransport, client, json_response};
use odata_client::ODataError;
use odata_client::api::HttpResponse;
use odata_client::api::query::QueryBuilder;
use serde_json::json;

fn people() -> odata_client::Query {
    QueryBuilder::new("People").build().unwrap()
}

#[tokio::test]
async fn test_two_server_errors_then_success() {
    let mock = MockTransport::new();
    mock.respond(HttpResponse::new(500).with_body("boom"));
    mock.respond(HttpResponse::new(500).with_body("boom"));
    mock.respond(json_response(json!({"value": [{"Id": 1}]})));

    let result = client(&mock, 3).execute_query(&people()).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(mock.calls(), 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mock = MockTransport::new();
    mock.respond(HttpResponse::new(400).with_body("{\"error\":{\"message\":\"bad filter\"}}"));
    mock.respond(json_response(json!({"value": []})));

    let err = client(&mock, 3).execute_query(&people()).await.unwrap_err();
    match err {
        ODataError::Client { status, url, body } => {
            assert_eq!(status, 400);
            assert_eq!(url, "https://host/odata/People");
            assert!(body.contains("bad filter"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_server_error_surfaces_after_retries() {
    let mock = MockTransport::new();
    for _ in 0..4 {
        mock.respond(HttpResponse::new(503));
    }

    let err = client(&mock, 3).execute_query(&people()).await.unwrap_err();
    assert!(matches!(err, ODataError::Server { status: 503, .. }));
    assert_eq!(mock.calls(), 4);
}

#[tokio::test]
async fn test_transport_failure_is_retried() {
    let mock = MockTransport::new();
    mock.fail("connection reset");
    mock.respond(json_response(json!({"value": []})));

    client(&mock, 1).execute_query(&people()).await.unwrap();
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_not_found_and_unauthorized() {
    let mock = MockTransport::new();
    mock.respond(HttpResponse::new(404));
    mock.respond(HttpResponse::new(401));

    let client = client(&mock, 3);
    assert!(matches!(
        client.execute_query(&people()).await,
        Err(ODataError::NotFound { .. })
    ));
    assert!(matches!(
        client.execute_query(&people()).await,
        Err(ODataError::Unauthorized { status: 401, .. })
    ));
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_redirect_is_not_treated_as_server_error() {
    let mock = MockTransport::new();
    mock.respond(HttpResponse::new(302).with_header("Location", "https://login/"));
    mock.respond(json_response(json!({"value": []})));

    let err = client(&mock, 3).execute_query(&people()).await.unwrap_err();
    assert!(matches!(err, ODataError::UnexpectedStatus { status: 302, .. }));
    assert_eq!(mock.calls(), 1);
}
