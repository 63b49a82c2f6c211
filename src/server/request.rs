use crate::ids::RequestId;
use crate::payload::RequestPayload;
use may_minihttp::Request;
use std::collections::HashMap;
use std::io::Read;

/// Canonical header name used to request a streaming exchange.
pub const STREAM_HEADER: &str = "X-Go-Stream";
/// Canonical header name carrying the request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
/// Canonical name of the Host header, ensured present on every payload.
pub const HOST_HEADER: &str = "Host";

/// Turn an incoming HTTP request into the payload forwarded to a worker.
///
/// Consumes the request body; the returned payload carries the full path
/// including the query string, canonical header names with per-name value
/// order preserved, and a freshly minted request id.
pub fn build_payload(req: Request) -> RequestPayload {
    let method = req.method().to_uppercase();
    let path = req.path().to_string();

    let headers: Vec<(String, Vec<u8>)> = req
        .headers()
        .iter()
        .map(|h| (h.name.to_string(), h.value.to_vec()))
        .collect();

    let mut body = Vec::new();
    let _ = req.body().read_to_end(&mut body);

    payload_from_parts(&method, &path, headers, String::from_utf8_lossy(&body).into_owned())
}

/// Pure assembly step, split out from the HTTP types for testability.
pub fn payload_from_parts(
    method: &str,
    path: &str,
    raw_headers: Vec<(String, Vec<u8>)>,
    body: String,
) -> RequestPayload {
    let id = RequestId::new().to_string();

    let mut headers: HashMap<String, Vec<String>> = HashMap::with_capacity(raw_headers.len() + 1);
    for (name, value) in raw_headers {
        headers
            .entry(canonical_header_name(&name))
            .or_default()
            .push(String::from_utf8_lossy(&value).into_owned());
    }

    // ensure Host is present; an absolute-form request target is the only
    // other place the client names it
    if !headers.contains_key(HOST_HEADER) {
        if let Some(host) = host_from_target(path) {
            headers.insert(HOST_HEADER.to_string(), vec![host]);
        }
    }

    if !headers.contains_key(REQUEST_ID_HEADER) {
        headers.insert(REQUEST_ID_HEADER.to_string(), vec![id.clone()]);
    }

    RequestPayload {
        id,
        method: method.to_string(),
        path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        headers,
        body,
    }
}

/// Canonical MIME-style header casing: each `-`-separated segment starts
/// with an uppercase letter, the rest lowercased. `x-request-id` becomes
/// `X-Request-Id`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Authority of an absolute-form request target, e.g.
/// `http://example.com/x` yields `example.com`.
fn host_from_target(path: &str) -> Option<String> {
    let rest = path
        .strip_prefix("http://")
        .or_else(|| path.strip_prefix("https://"))?;
    let authority = rest.split(['/', '?']).next().unwrap_or("");
    if authority.is_empty() {
        None
    } else {
        Some(authority.to_string())
    }
}

/// First value of a header on the payload, by canonical name.
pub fn header_value<'a>(payload: &'a RequestPayload, canonical_name: &str) -> Option<&'a str> {
    payload
        .headers
        .get(canonical_name)
        .and_then(|values| values.first())
        .map(String::as_str)
}

/// Minimal query-string lookup on a raw path. Values are returned verbatim
/// (channel names and flags here never need percent decoding).
pub fn query_param(path: &str, name: &str) -> Option<String> {
    let query = path.split_once('?')?.1;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k == name {
            return Some(v.to_string());
        }
    }
    None
}

/// The path with any query string removed, used for routing and metrics.
pub fn route_path(path: &str) -> &str {
    let stripped = path.split('?').next().unwrap_or(path);
    if stripped.is_empty() {
        "/"
    } else {
        stripped
    }
}
