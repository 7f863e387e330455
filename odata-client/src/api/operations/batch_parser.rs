//! Batch response decoding
//!
//! Multipart responses are paired with the request by position, JSON
//! responses by `id`. Either way the result list has exactly one entry per
//! submitted operation, in submission order.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::transport::find_header;
use crate::error::{ODataError, Result};

use super::batch::{BatchItem, BatchRequest};
use super::operation::Operation;

/// Outcome of one operation in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// The operation that was submitted
    pub operation: Operation,
    pub content_id: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// ETag from the response header, falling back to `@odata.etag` in the body
    pub fn etag(&self) -> Option<String> {
        if let Some(etag) = self.header("ETag") {
            return Some(etag.to_string());
        }
        self.json()
            .ok()
            .flatten()
            .and_then(|v| v.get("@odata.etag").and_then(Value::as_str).map(str::to_string))
    }

    /// Parsed body, `None` when the response carried no content
    pub fn json(&self) -> Result<Option<Value>> {
        if self.body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&self.body)?))
    }

    /// Deserialize the body into `T`, `None` when there is no content
    pub fn typed<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.json()? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// The failure as an error, `None` for a success
    pub fn error(&self) -> Option<ODataError> {
        if self.is_success() {
            None
        } else {
            Some(ODataError::from_status(
                self.status,
                self.operation.url(),
                self.body.clone(),
            ))
        }
    }
}

/// All results of a batch, in submission order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchResults {
    results: Vec<BatchResult>,
}

impl BatchResults {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BatchResult> {
        self.results.get(index)
    }

    pub fn by_content_id(&self, content_id: &str) -> Option<&BatchResult> {
        self.results.iter().find(|r| r.content_id == content_id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BatchResult> {
        self.results.iter()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(BatchResult::is_success)
    }

    /// Results that did not succeed
    pub fn failures(&self) -> impl Iterator<Item = &BatchResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

impl IntoIterator for BatchResults {
    type Item = BatchResult;
    type IntoIter = std::vec::IntoIter<BatchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a BatchResults {
    type Item = &'a BatchResult;
    type IntoIter = std::slice::Iter<'a, BatchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

/// A decoded embedded HTTP response
#[derive(Debug, Clone, PartialEq)]
struct PartResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

/// Top-level multipart part: one response or a nested changeset response
#[derive(Debug)]
enum Part {
    Response(PartResponse),
    Changeset(Vec<PartResponse>),
}

/// Decodes batch responses against the request that produced them
pub struct BatchResponseParser;

impl BatchResponseParser {
    /// Decode a response body, choosing the format from its content type
    pub fn parse(request: &BatchRequest, content_type: &str, body: &str) -> Result<BatchResults> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match media_type.as_str() {
            "multipart/mixed" => {
                let boundary = boundary_param(content_type).ok_or_else(|| {
                    ODataError::Protocol(format!(
                        "multipart batch response without boundary: {}",
                        content_type
                    ))
                })?;
                Self::parse_multipart(request, &boundary, body)
            }
            "application/json" => Self::parse_json(request, body),
            other => Err(ODataError::Protocol(format!(
                "unexpected batch response content type '{}'",
                other
            ))),
        }
    }

    pub fn parse_multipart(request: &BatchRequest, boundary: &str, body: &str) -> Result<BatchResults> {
        let parts = split_multipart(body, boundary)?
            .into_iter()
            .map(parse_part)
            .collect::<Result<Vec<_>>>()?;

        if parts.len() != request.items().len() {
            return Err(count_mismatch(request.len(), leaf_count(&parts)));
        }

        let mut results = Vec::with_capacity(request.len());
        for (item, part) in request.items().iter().zip(parts) {
            let entries = item.entries();
            let responses = match part {
                Part::Changeset(responses) => responses,
                // a changeset that failed as a whole answers with one response
                Part::Response(response)
                    if matches!(item, BatchItem::Changeset(_))
                        && entries.len() > 1
                        && !(200..300).contains(&response.status) =>
                {
                    vec![response; entries.len()]
                }
                Part::Response(response) => vec![response],
            };
            if responses.len() != entries.len() {
                return Err(count_mismatch(entries.len(), responses.len()));
            }
            for (entry, response) in entries.iter().zip(responses) {
                results.push(BatchResult {
                    operation: entry.operation.clone(),
                    content_id: entry.content_id.clone(),
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                });
            }
        }

        log::debug!("decoded {} multipart batch results", results.len());
        Ok(BatchResults { results })
    }

    pub fn parse_json(request: &BatchRequest, body: &str) -> Result<BatchResults> {
        let value: Value = serde_json::from_str(body)?;
        let responses = value
            .get("responses")
            .and_then(Value::as_array)
            .ok_or_else(|| ODataError::Protocol("JSON batch response without 'responses'".to_string()))?;

        let mut decoded: Vec<(String, PartResponse)> = Vec::with_capacity(responses.len());
        for response in responses {
            let id = match response.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(ODataError::Protocol(
                        "JSON batch response entry without id".to_string(),
                    ));
                }
            };
            decoded.push((id, json_part(response)?));
        }

        if decoded.len() > request.len() {
            return Err(count_mismatch(request.len(), decoded.len()));
        }
        if let Some((id, _)) = decoded
            .iter()
            .find(|(id, _)| !request.entries().any(|e| &e.content_id == id))
        {
            return Err(ODataError::Protocol(format!(
                "batch response for unknown request id '{}'",
                id
            )));
        }

        let lookup = |id: &str| decoded.iter().find(|(rid, _)| rid == id).map(|(_, r)| r);

        let mut results = Vec::with_capacity(request.len());
        for item in request.items() {
            // members the service skipped after a changeset failure share that failure
            let group_failure = match item {
                BatchItem::Changeset(changeset) => changeset
                    .entries
                    .iter()
                    .filter_map(|e| lookup(&e.content_id))
                    .find(|r| !(200..300).contains(&r.status)),
                BatchItem::Single(_) => None,
            };
            for entry in item.entries() {
                let response = lookup(&entry.content_id)
                    .or(group_failure)
                    .ok_or_else(|| count_mismatch(request.len(), decoded.len()))?;
                results.push(BatchResult {
                    operation: entry.operation.clone(),
                    content_id: entry.content_id.clone(),
                    status: response.status,
                    headers: response.headers.clone(),
                    body: response.body.clone(),
                });
            }
        }

        log::debug!("decoded {} JSON batch results", results.len());
        Ok(BatchResults { results })
    }
}

fn count_mismatch(expected: usize, actual: usize) -> ODataError {
    ODataError::Protocol(format!(
        "batch response has {} results for {} submitted operations",
        actual, expected
    ))
}

fn leaf_count(parts: &[Part]) -> usize {
    parts
        .iter()
        .map(|p| match p {
            Part::Response(_) => 1,
            Part::Changeset(responses) => responses.len(),
        })
        .sum()
}

/// `boundary=` parameter of a multipart content type, unquoted
fn boundary_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Split a multipart body into its parts (headers and body, delimiters removed)
///
/// A delimiter only counts at the start of a line; boundary text inside a
/// part body is left alone.
fn split_multipart<'a>(body: &'a str, boundary: &str) -> Result<Vec<&'a str>> {
    let delimiter = format!("--{}", boundary);
    let positions: Vec<usize> = body
        .match_indices(delimiter.as_str())
        .map(|(i, _)| i)
        .filter(|&i| i == 0 || body[..i].ends_with('\n'))
        .filter(|&i| {
            let after = &body[i + delimiter.len()..];
            after.is_empty() || after.starts_with("--") || after.starts_with(['\r', '\n', ' ', '\t'])
        })
        .collect();
    if positions.is_empty() {
        return Err(ODataError::Protocol(format!(
            "boundary '{}' not found in multipart body",
            boundary
        )));
    }

    let mut parts = Vec::new();
    for (n, &start) in positions.iter().enumerate() {
        let rest = &body[start + delimiter.len()..];
        if rest.starts_with("--") {
            return Ok(parts);
        }
        let Some(&end) = positions.get(n + 1) else {
            break;
        };
        let section = &body[start + delimiter.len()..end];
        let section = strip_line_break_prefix(section.trim_start_matches([' ', '\t']));
        let section = section
            .strip_suffix("\r\n")
            .or_else(|| section.strip_suffix('\n'))
            .unwrap_or(section);
        parts.push(section);
    }

    Err(ODataError::Protocol(format!(
        "multipart body is missing closing boundary '{}--'",
        boundary
    )))
}

fn strip_line_break_prefix(s: &str) -> &str {
    s.strip_prefix("\r\n")
        .or_else(|| s.strip_prefix('\n'))
        .unwrap_or(s)
}

/// Split at the first blank line into (header block, rest)
fn split_head(s: &str) -> (&str, &str) {
    let crlf = s.find("\r\n\r\n").map(|i| (i, 4));
    let lf = s.find("\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((i, len)) => (&s[..i], &s[i + len..]),
        None => (s, ""),
    }
}

fn parse_headers(block: &str) -> Vec<(String, String)> {
    block
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn parse_part(part: &str) -> Result<Part> {
    let (head, rest) = split_head(part);
    let headers = parse_headers(head);
    let content_type = find_header(&headers, "Content-Type").unwrap_or_default();

    if content_type.to_ascii_lowercase().starts_with("multipart/mixed") {
        let boundary = boundary_param(content_type).ok_or_else(|| {
            ODataError::Protocol("changeset response without boundary".to_string())
        })?;
        let responses = split_multipart(rest, &boundary)?
            .into_iter()
            .map(|inner| {
                let (_, embedded) = split_head(inner);
                parse_embedded_response(embedded)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Part::Changeset(responses))
    } else {
        parse_embedded_response(rest).map(Part::Response)
    }
}

/// Parse `HTTP/1.1 <status> <reason>`, headers and body
fn parse_embedded_response(s: &str) -> Result<PartResponse> {
    let s = strip_line_break_prefix(s);
    let (head, body) = split_head(s);
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();

    let mut tokens = status_line.split_whitespace();
    let status = match (tokens.next(), tokens.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code.parse::<u16>().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        ODataError::Protocol(format!("invalid status line in batch part: '{}'", status_line))
    })?;

    let headers = parse_headers(&lines.collect::<Vec<_>>().join("\n"));
    Ok(PartResponse {
        status,
        headers,
        body: body.trim_end_matches(['\r', '\n']).to_string(),
    })
}

fn json_part(response: &Value) -> Result<PartResponse> {
    let status = response
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .ok_or_else(|| ODataError::Protocol("JSON batch response entry without status".to_string()))?;

    let headers = response
        .get("headers")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    let body = match response.get("body") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    Ok(PartResponse {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::operations::batch::{BatchFormat, BatchRequest};
    use serde_json::json;

    fn request() -> BatchRequest {
        BatchRequest::builder()
            .add(Operation::get("People('russell')"))
            .changeset([
                Operation::create("People", json!({"UserName": "kim"})),
                Operation::delete("People", "old"),
            ])
            .build()
            .unwrap()
    }

    fn http_part(status_line: &str, headers: &str, body: &str) -> String {
        let headers = if headers.is_empty() {
            String::new()
        } else {
            format!("{}\r\n", headers)
        };
        format!(
            "Content-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\n{}\r\n{}\r\n{}\r\n",
            status_line, headers, body
        )
    }

    #[test]
    fn test_multipart_with_changeset() {
        let body = format!(
            "--batchresponse_1\r\n{}--batchresponse_1\r\nContent-Type: multipart/mixed; boundary=changesetresponse_1\r\n\r\n--changesetresponse_1\r\n{}--changesetresponse_1\r\n{}--changesetresponse_1--\r\n--batchresponse_1--\r\n",
            http_part("HTTP/1.1 200 OK", "Content-Type: application/json", "{\"UserName\":\"russell\"}"),
            http_part("HTTP/1.1 201 Created", "ETag: W/\"5\"", "{\"UserName\":\"kim\"}"),
            http_part("HTTP/1.1 204 No Content", "", ""),
        );

        let results = BatchResponseParser::parse(
            &request(),
            "multipart/mixed; boundary=batchresponse_1",
            &body,
        )
        .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results.get(0).unwrap().status, 200);
        let created = results.by_content_id("2").unwrap();
        assert_eq!(created.status, 201);
        assert_eq!(created.etag().as_deref(), Some("W/\"5\""));
        assert_eq!(created.json().unwrap(), Some(json!({"UserName": "kim"})));
        assert_eq!(results.get(2).unwrap().status, 204);
        assert_eq!(results.get(2).unwrap().json().unwrap(), None);
        assert!(results.all_succeeded());
    }

    #[test]
    fn test_changeset_failure_fans_out() {
        let body = format!(
            "--b\r\n{}--b\r\n{}--b--\r\n",
            http_part("HTTP/1.1 200 OK", "", "{}"),
            http_part("HTTP/1.1 400 Bad Request", "Content-Type: application/json", "{\"error\":{}}"),
        );

        let results =
            BatchResponseParser::parse(&request(), "multipart/mixed; boundary=\"b\"", &body).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.get(0).unwrap().is_success());
        assert_eq!(results.get(1).unwrap().status, 400);
        assert_eq!(results.get(2).unwrap().status, 400);
        assert_eq!(results.failures().count(), 2);
        assert!(matches!(
            results.get(2).unwrap().error(),
            Some(ODataError::Client { status: 400, .. })
        ));
    }

    #[test]
    fn test_count_mismatch_is_protocol_error() {
        let body = format!("--b\r\n{}--b--\r\n", http_part("HTTP/1.1 200 OK", "", "{}"));
        let err = BatchResponseParser::parse(&request(), "multipart/mixed; boundary=b", &body)
            .unwrap_err();
        assert!(matches!(err, ODataError::Protocol(ref m) if m.contains("results")));
    }

    #[test]
    fn test_boundary_text_inside_body_is_not_a_delimiter() {
        let body = format!(
            "--b\r\n{}--b\r\n{}--b--\r\n",
            http_part("HTTP/1.1 200 OK", "Content-Type: application/json", "{\"Note\":\"see --b here\"}"),
            http_part("HTTP/1.1 400 Bad Request", "", "{}"),
        );

        let results = BatchResponseParser::parse(&request(), "multipart/mixed; boundary=b", &body).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            results.get(0).unwrap().json().unwrap(),
            Some(json!({"Note": "see --b here"}))
        );
        assert_eq!(results.get(2).unwrap().status, 400);
    }

    #[test]
    fn test_missing_boundary() {
        let err = BatchResponseParser::parse(&request(), "multipart/mixed", "").unwrap_err();
        assert!(matches!(err, ODataError::Protocol(_)));

        let err =
            BatchResponseParser::parse(&request(), "multipart/mixed; boundary=zz", "no parts")
                .unwrap_err();
        assert!(matches!(err, ODataError::Protocol(ref m) if m.contains("not found")));

        let err = BatchResponseParser::parse(
            &request(),
            "multipart/mixed; boundary=zz",
            "--zz\r\nContent-Type: application/http\r\n\r\nHTTP/1.1 200 OK\r\n\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, ODataError::Protocol(ref m) if m.contains("closing")));
    }

    #[test]
    fn test_json_responses_paired_by_id() {
        let batch = request();
        assert_eq!(
            batch.encode(BatchFormat::Json).unwrap().content_type,
            "application/json"
        );
        let body = json!({
            "responses": [
                {"id": "3", "status": 204},
                {"id": "1", "status": 200, "body": {"UserName": "russell"}},
                {"id": "2", "status": 201, "headers": {"etag": "W/\"9\""}, "body": {"UserName": "kim"}}
            ]
        })
        .to_string();

        let results = BatchResponseParser::parse(&batch, "application/json; odata.metadata=minimal", &body)
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.content_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(results.get(1).unwrap().etag().as_deref(), Some("W/\"9\""));

        #[derive(serde::Deserialize)]
        struct Person {
            #[serde(rename = "UserName")]
            user_name: String,
        }
        let person: Person = results.get(0).unwrap().typed().unwrap().unwrap();
        assert_eq!(person.user_name, "russell");
    }

    #[test]
    fn test_json_changeset_failure_fans_out() {
        let body = json!({
            "responses": [
                {"id": "1", "status": 200, "body": {}},
                {"id": "2", "status": 409, "body": {"error": {"message": "conflict"}}}
            ]
        })
        .to_string();
        let results = BatchResponseParser::parse(&request(), "application/json", &body).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.get(2).unwrap().status, 409);
    }

    #[test]
    fn test_json_missing_result_is_protocol_error() {
        let body = json!({"responses": [{"id": "1", "status": 200}]}).to_string();
        let err = BatchResponseParser::parse(&request(), "application/json", &body).unwrap_err();
        assert!(matches!(err, ODataError::Protocol(_)));

        let body = json!({"responses": [{"id": "9", "status": 200}]}).to_string();
        let err = BatchResponseParser::parse(&request(), "application/json", &body).unwrap_err();
        assert!(matches!(err, ODataError::Protocol(ref m) if m.contains("unknown")));
    }
}
