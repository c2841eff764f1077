//! The Agent's inner exchange loop body (§4.3): turn one RequestFrame into
//! an outbound call against the target service and a ResponseFrame echoing
//! the result back.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tracing::warn;
use wire::{decode_body, encode_body, RequestFrame, ResponseFrame};

/// Perform the target-service call for one RequestFrame and build the
/// matching ResponseFrame. Returns `None` when the call itself could not be
/// made (connect refused, DNS failure, ...) — per §7 TargetServiceError, a
/// connect failure is left to the Gateway's own 600s timeout rather than
/// synthesised into a ResponseFrame.
pub async fn dispatch(
    client: &reqwest::Client,
    service_url: &str,
    target_host: &str,
    frame: RequestFrame,
) -> Option<ResponseFrame> {
    let method = match Method::from_bytes(frame.method.as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            warn!(guid = %frame.guid, method = %frame.method, "unrecognised HTTP method, dropping exchange");
            return None;
        }
    };

    let url = format!("{}{}", service_url.trim_end_matches('/'), frame.path);
    let headers = build_headers(&frame.headers, target_host);

    let body = match decode_body(&frame.data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(guid = %frame.guid, error = %e, "failed to decode request body, dropping exchange");
            return None;
        }
    };

    let response = match client.request(method, &url).headers(headers).body(body).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(guid = %frame.guid, error = %e, "target service call failed, leaving exchange to time out on the gateway");
            return None;
        }
    };

    let status = response.status().as_u16();
    let response_headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let content = match response.bytes().await {
        Ok(bytes) => encode_body(&bytes),
        Err(e) => {
            warn!(guid = %frame.guid, error = %e, "failed to read target response body, dropping exchange");
            return None;
        }
    };

    Some(ResponseFrame {
        guid: frame.guid,
        status,
        headers: response_headers,
        content,
    })
}

/// Copy the caller's headers through, replacing `Host` with the target's own
/// host (the original `Host` names the Gateway, not the internal service —
/// §4.3). Header names and values that fail to parse as HTTP header bytes
/// are skipped rather than aborting the whole exchange.
fn build_headers(original: &[(String, String)], target_host: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in original {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        let (name, value) = match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => (name, value),
            _ => continue,
        };
        headers.append(name, value);
    }
    if let Ok(value) = HeaderValue::from_str(target_host) {
        headers.insert(reqwest::header::HOST, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_header_is_replaced_with_the_targets_host() {
        let original = vec![
            ("Host".to_string(), "public-gateway.example".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
        ];
        let headers = build_headers(&original, "10.0.0.5:8080");
        assert_eq!(headers.get("host").unwrap(), "10.0.0.5:8080");
        assert_eq!(headers.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn duplicate_headers_are_all_preserved() {
        let original = vec![
            ("MyHeader".to_string(), "1".to_string()),
            ("MyHeader".to_string(), "2".to_string()),
            ("MyHeader".to_string(), "3".to_string()),
        ];
        let headers = build_headers(&original, "target.internal");
        let values: Vec<&str> = headers.get_all("myheader").iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
    }
}
