//! Builds Loki push bodies and ships them over HTTP (spec.md §4.4).

use crate::entry::Entry;
use crate::error::Error;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use url::Url;

/// A single Loki stream: one label set plus its ordered log lines.
#[derive(Debug, Serialize, PartialEq)]
struct Stream {
    stream: BTreeMap<String, String>,
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize, PartialEq)]
struct PushRequest {
    streams: Vec<Stream>,
}

/// Partition `entries` by their exact `labels` mapping, sort each
/// partition by timestamp, and wrap as Loki's push body (spec.md §4.4).
///
/// `BTreeMap<String, String>` is used for both the partition key and the
/// `stream` field so two entries with the same labels always land in the
/// same partition, and the emitted JSON has a deterministic key order.
fn build_push_body(entries: &[Entry]) -> serde_json::Value {
    let mut partitions: Vec<(BTreeMap<String, String>, Vec<&Entry>)> = Vec::new();
    for entry in entries {
        match partitions.iter_mut().find(|(labels, _)| *labels == entry.labels) {
            Some((_, bucket)) => bucket.push(entry),
            None => partitions.push((entry.labels.clone(), vec![entry])),
        }
    }

    let streams = partitions
        .into_iter()
        .map(|(labels, mut bucket)| {
            bucket.sort_by_key(|e| e.timestamp);
            let values = bucket
                .iter()
                .map(|entry| {
                    let mut value = vec![
                        serde_json::Value::String(entry.timestamp.to_string()),
                        serde_json::Value::String(entry.message.clone()),
                    ];
                    if entry.has_structured_metadata() {
                        value.push(serde_json::to_value(&entry.structured_metadata).unwrap());
                    }
                    value
                })
                .collect();
            Stream { stream: labels, values }
        })
        .collect();

    serde_json::to_value(PushRequest { streams }).expect("push body serialization is infallible")
}

#[derive(Debug)]
struct BadRedirect {
    status: u16,
    to: Url,
}

impl fmt::Display for BadRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A 302/303 here drops the POST body; Loki would otherwise silently
        // 200 a request nobody read.
        write!(f, "invalid HTTP {} redirect to {}", self.status, self.to)
    }
}

impl std::error::Error for BadRedirect {}

/// Append `/loki/api/v1/push` to `base_url`'s path (spec.md §6), preserving
/// any existing path prefix regardless of whether `base_url` ends in a
/// slash. `Url::join` alone would instead resolve it relative to the last
/// path segment, silently dropping that segment for a prefixed base URL
/// without a trailing slash.
fn push_url(base_url: &Url) -> Url {
    let mut url = base_url.clone();
    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{prefix}/loki/api/v1/push"));
    url
}

/// Pushes batches of entries to Loki's JSON push API.
pub struct LokiClient {
    http: reqwest::Client,
}

impl LokiClient {
    /// Build a client with the given per-request timeout (spec.md §5:
    /// recommended `batch_interval_ms * 2`, floor 5s).
    pub fn new(timeout: Duration) -> LokiClient {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::custom(|attempt| {
                let status = attempt.status().as_u16();
                if status == 302 || status == 303 {
                    let to = attempt.url().clone();
                    return attempt.error(BadRedirect { status, to });
                }
                reqwest::redirect::Policy::default().redirect(attempt)
            }))
            .build()
            .expect("reqwest client configuration is valid");
        LokiClient { http }
    }

    /// POST `entries` to `<base_url>/loki/api/v1/push`. Empty batches
    /// succeed without contacting the network (spec.md §4.4).
    pub async fn push(&self, base_url: &Url, entries: &[Entry]) -> Result<(), Error> {
        if entries.is_empty() {
            return Ok(());
        }
        let url = push_url(base_url);
        let body = build_push_body(entries);

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::HttpError { status: status.as_u16(), body })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::level::Level;

    fn entry(labels: &[(&str, &str)], ts: i64, msg: &str) -> Entry {
        Entry {
            timestamp: ts,
            level: Level::Info,
            message: msg.to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            structured_metadata: Default::default(),
        }
    }

    #[test]
    fn push_url_appends_to_bare_host() {
        let base = Url::parse("http://loki.example").unwrap();
        assert_eq!(push_url(&base).as_str(), "http://loki.example/loki/api/v1/push");
    }

    #[test]
    fn push_url_preserves_path_prefix_without_trailing_slash() {
        let base = Url::parse("http://gateway.example/proxy/loki").unwrap();
        assert_eq!(
            push_url(&base).as_str(),
            "http://gateway.example/proxy/loki/loki/api/v1/push"
        );
    }

    #[test]
    fn push_url_preserves_path_prefix_with_trailing_slash() {
        let base = Url::parse("http://gateway.example/proxy/loki/").unwrap();
        assert_eq!(
            push_url(&base).as_str(),
            "http://gateway.example/proxy/loki/loki/api/v1/push"
        );
    }

    #[test]
    fn happy_path_single_stream() {
        let entries: Vec<_> = (1..=5)
            .map(|i| entry(&[("level", "info")], i, &((b'a' + (i - 1) as u8) as char).to_string()))
            .collect();
        let body = build_push_body(&entries);
        let expected: serde_json::Value = serde_json::json!({
            "streams": [{
                "stream": {"level": "info"},
                "values": [["1","a"],["2","b"],["3","c"],["4","d"],["5","e"]],
            }]
        });
        assert_eq!(body, expected);
    }

    #[test]
    fn partitions_by_labels_and_sorts_within_partition() {
        let entries = vec![
            entry(&[("level", "info")], 3, "z"),
            entry(&[("level", "error")], 2, "y"),
            entry(&[("level", "info")], 1, "x"),
        ];
        let body = build_push_body(&entries);
        let streams = body["streams"].as_array().unwrap();
        assert_eq!(streams.len(), 2);
        let info_stream = streams
            .iter()
            .find(|s| s["stream"]["level"] == "info")
            .unwrap();
        assert_eq!(info_stream["values"], serde_json::json!([["1","x"],["3","z"]]));
        let error_stream = streams
            .iter()
            .find(|s| s["stream"]["level"] == "error")
            .unwrap();
        assert_eq!(error_stream["values"], serde_json::json!([["2","y"]]));
    }

    #[test]
    fn structured_metadata_promotes_to_three_element_value() {
        let mut with_meta = entry(&[("level", "info")], 2, "b");
        with_meta.structured_metadata.insert("request_id".into(), "r1".into());
        let entries = vec![entry(&[("level", "info")], 1, "a"), with_meta];
        let body = build_push_body(&entries);
        let values = &body["streams"][0]["values"];
        assert_eq!(values[0].as_array().unwrap().len(), 2);
        assert_eq!(values[1].as_array().unwrap().len(), 3);
        assert_eq!(values[1][2]["request_id"], "r1");
    }
}
