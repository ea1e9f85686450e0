use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rampr_http::{HttpClient, HttpRequest};
use rampr_metrics::{MetricHandle, RateSample};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

/// Exactly one classification per call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    HttpError,
    Timeout,
    TransportError,
    /// Acceptable status, but the body did not decode against the schema.
    DecodeError,
}

/// Statuses the caller considers acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSet(Vec<RangeInclusive<u16>>);

impl Default for StatusSet {
    fn default() -> Self {
        Self(vec![200..=399])
    }
}

impl StatusSet {
    #[must_use]
    pub fn only(codes: &[u16]) -> Self {
        Self(codes.iter().map(|c| *c..=*c).collect())
    }

    #[must_use]
    pub fn range(lo: u16, hi: u16) -> Self {
        Self(vec![lo..=hi])
    }

    #[must_use]
    pub fn with(mut self, code: u16) -> Self {
        self.0.push(code..=code);
        self
    }

    #[must_use]
    pub fn contains(&self, status: u16) -> bool {
        self.0.iter().any(|r| r.contains(&status))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn matches(self, v: &Value) -> bool {
        match self {
            Self::String => v.is_string(),
            Self::Number => v.is_number(),
            Self::Integer => v.is_i64() || v.is_u64(),
            Self::Bool => v.is_boolean(),
            Self::Array => v.is_array(),
            Self::Object => v.is_object(),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// JSON pointer into the body, e.g. `/token` or `/user/id`.
    pub pointer: String,
    pub ty: FieldType,
    pub optional: bool,
}

pub type Decoded = BTreeMap<String, Value>;

/// Typed view of a JSON response body. Only declared fields are exposed to scenarios.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSchema {
    fields: Vec<FieldSpec>,
}

impl ResponseSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, name: &str, pointer: &str, ty: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            pointer: pointer.to_string(),
            ty,
            optional: false,
        });
        self
    }

    #[must_use]
    pub fn optional_field(mut self, name: &str, pointer: &str, ty: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            pointer: pointer.to_string(),
            ty,
            optional: true,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn decode(&self, body: &[u8]) -> Result<Decoded, String> {
        let doc: Value =
            serde_json::from_slice(body).map_err(|e| format!("body is not valid JSON: {e}"))?;

        let mut out = Decoded::new();
        for f in &self.fields {
            match doc.pointer(&f.pointer) {
                Some(v) if f.ty.matches(v) => {
                    out.insert(f.name.clone(), v.clone());
                }
                Some(Value::Null) | None if f.optional => {}
                Some(v) => {
                    return Err(format!(
                        "field `{}` at `{}` is not {:?}: {v}",
                        f.name, f.pointer, f.ty
                    ));
                }
                None => return Err(format!("field `{}` missing at `{}`", f.name, f.pointer)),
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Duration,
    pub expect_status: StatusSet,
    pub schema: Option<Arc<ResponseSchema>>,
}

impl ProbeRequest {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            expect_status: StatusSet::default(),
            schema: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post_json(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::new(http::Method::POST, url)
        }
        .with_header("content-type", "application/json")
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn expecting(mut self, statuses: StatusSet) -> Self {
        self.expect_status = statuses;
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: Arc<ResponseSchema>) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Metrics a probe call writes into. Latency goes to every trend; pass/fail to `failed`.
#[derive(Debug, Clone)]
pub struct ProbeMetrics {
    pub latency: Vec<MetricHandle>,
    pub failed: MetricHandle,
    pub requests: Option<MetricHandle>,
    pub data_received: Option<MetricHandle>,
}

impl ProbeMetrics {
    #[must_use]
    pub fn new(latency: MetricHandle, failed: MetricHandle) -> Self {
        Self {
            latency: vec![latency],
            failed,
            requests: None,
            data_received: None,
        }
    }

    #[must_use]
    pub fn with_latency(mut self, trend: MetricHandle) -> Self {
        self.latency.push(trend);
        self
    }

    #[must_use]
    pub fn with_requests(mut self, counter: MetricHandle) -> Self {
        self.requests = Some(counter);
        self
    }

    #[must_use]
    pub fn with_data_received(mut self, counter: MetricHandle) -> Self {
        self.data_received = Some(counter);
        self
    }

    fn record(&self, outcome: &RequestOutcome) {
        let ms = outcome.latency.as_secs_f64() * 1000.0;
        for t in &self.latency {
            t.observe(ms);
        }
        self.failed
            .add_rate(RateSample::from_success(outcome.is_success()));
        if let Some(c) = &self.requests {
            c.add(1);
        }
        if let Some(c) = &self.data_received {
            c.add(outcome.body.len() as u64);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub kind: OutcomeKind,
    /// `None` when no response head arrived.
    pub status: Option<u16>,
    pub latency: Duration,
    pub body: Bytes,
    /// Schema fields; empty unless the call succeeded with a schema.
    pub decoded: Decoded,
    pub error: Option<String>,
}

impl RequestOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.decoded.get(name)
    }

    /// Raw body parsed as JSON, regardless of classification.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    fn failed(kind: OutcomeKind, latency: Duration, error: String) -> Self {
        Self {
            kind,
            status: None,
            latency,
            body: Bytes::new(),
            decoded: Decoded::new(),
            error: Some(error),
        }
    }
}

/// Single-shot request executor. Never retries.
#[derive(Debug, Clone, Default)]
pub struct ProbeClient {
    http: HttpClient,
}

impl ProbeClient {
    #[must_use]
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Send `req` once and record the outcome into `metrics`.
    ///
    /// A request that cannot be built (bad URL, header or scheme) never reaches the network:
    /// it returns [`Error::InvalidRequest`] and records nothing.
    pub async fn execute(
        &self,
        req: &ProbeRequest,
        metrics: &ProbeMetrics,
    ) -> crate::Result<RequestOutcome> {
        let outcome = self.send(req).await?;
        metrics.record(&outcome);
        Ok(outcome)
    }

    async fn send(&self, req: &ProbeRequest) -> crate::Result<RequestOutcome> {
        let http_req = HttpRequest {
            method: req.method.clone(),
            url: req.url.clone(),
            headers: req.headers.clone(),
            body: req.body.clone(),
            timeout: Some(req.timeout),
        };

        let started = Instant::now();
        let res = match self.http.request(http_req).await {
            Ok(res) => res,
            Err(err) if err.is_invalid_request() => {
                return Err(Error::InvalidRequest {
                    url: req.url.clone(),
                    reason: err.to_string(),
                });
            }
            Err(err) if err.is_timeout() => {
                return Ok(RequestOutcome::failed(
                    OutcomeKind::Timeout,
                    started.elapsed(),
                    err.to_string(),
                ));
            }
            Err(err) => {
                return Ok(RequestOutcome::failed(
                    OutcomeKind::TransportError,
                    started.elapsed(),
                    format!("{}: {err}", err.transport_error_kind()),
                ));
            }
        };

        let mut outcome = RequestOutcome {
            kind: OutcomeKind::Success,
            status: Some(res.status),
            latency: res.time_to_head,
            body: res.body,
            decoded: Decoded::new(),
            error: None,
        };

        if !req.expect_status.contains(res.status) {
            outcome.kind = OutcomeKind::HttpError;
            outcome.error = Some(format!("unexpected status {}", res.status));
            return Ok(outcome);
        }

        if let Some(schema) = &req.schema {
            match schema.decode(&outcome.body) {
                Ok(decoded) => outcome.decoded = decoded,
                Err(reason) => {
                    tracing::debug!(url = %req.url, %reason, "response decode failed");
                    outcome.kind = OutcomeKind::DecodeError;
                    outcome.error = Some(reason);
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampr_metrics::{Collector, MetricKind};
    use serde_json::json;

    #[test]
    fn default_status_set_accepts_2xx_and_3xx() {
        let s = StatusSet::default();
        assert!(s.contains(200));
        assert!(s.contains(304));
        assert!(!s.contains(403));
        assert!(StatusSet::only(&[200]).with(403).contains(403));
        assert!(!StatusSet::range(200, 204).contains(205));
    }

    #[test]
    fn schema_decodes_typed_fields() {
        let schema = ResponseSchema::new()
            .field("token", "/token", FieldType::String)
            .field("user_id", "/user/user_id", FieldType::Integer)
            .optional_field("nickname", "/user/nickname", FieldType::String);

        let body = json!({ "token": "abc", "user": { "user_id": 7 } }).to_string();
        let decoded = schema
            .decode(body.as_bytes())
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(decoded.get("token"), Some(&json!("abc")));
        assert_eq!(decoded.get("user_id"), Some(&json!(7)));
        assert!(!decoded.contains_key("nickname"));
    }

    #[tokio::test]
    async fn unbuildable_request_errors_without_recording() {
        let collector = Collector::new();
        let declare = |name: &str, kind: MetricKind| {
            collector
                .declare(name, kind)
                .unwrap_or_else(|e| panic!("{e}"))
        };
        let metrics = ProbeMetrics::new(
            declare("http_req_duration", MetricKind::Trend),
            declare("http_req_failed", MetricKind::Rate),
        )
        .with_requests(declare("http_reqs", MetricKind::Counter));
        let client = ProbeClient::default();

        for req in [
            ProbeRequest::get("http://127.0.0.1:1/x").with_header("authorization", "Bearer a\nb"),
            ProbeRequest::get("not a url"),
            ProbeRequest::get("ftp://127.0.0.1/x"),
        ] {
            let res = client.execute(&req, &metrics).await;
            assert!(matches!(res, Err(Error::InvalidRequest { .. })), "{res:?}");
        }

        let snap = collector.snapshot();
        for name in ["http_req_duration", "http_req_failed", "http_reqs"] {
            let series = snap
                .get(name)
                .unwrap_or_else(|| panic!("missing metric {name}"));
            assert_eq!(series.sample_count(), 0, "{name}");
        }
    }

    #[test]
    fn schema_rejects_wrong_types_missing_fields_and_bad_json() {
        let schema = ResponseSchema::new().field("courses", "/courses", FieldType::Array);

        assert!(schema.decode(br#"{"courses": {}}"#).is_err());
        assert!(schema.decode(br#"{"total": 3}"#).is_err());
        assert!(schema.decode(b"<html>").is_err());
        assert!(schema.decode(br#"{"courses": []}"#).is_ok());
    }
}
