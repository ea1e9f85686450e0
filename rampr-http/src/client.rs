use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};

use super::util::{flatten_headers, has_header, host_header_value};
use super::{Error, HttpRequest, HttpResponse, Result};

/// Connect timeout used by [`HttpClient::default`]. Without it an unreachable target stalls
/// every virtual user for the OS-level SYN timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Pooled HTTP/1.1 client shared by every virtual user of a run.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pool: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CONNECT_TIMEOUT))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut tcp = HttpConnector::new();
        tcp.enforce_http(false);
        tcp.set_connect_timeout(connect_timeout);
        tcp.set_nodelay(true);

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(tcp);

        Self {
            pool: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    /// Send `req` and read the full body.
    ///
    /// `req.timeout` bounds the whole exchange (connect, head and body).
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let Some(limit) = req.timeout else {
            return self.exchange(req).await;
        };
        tokio::time::timeout(limit, self.exchange(req))
            .await
            .unwrap_or(Err(Error::Timeout(limit)))
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }

    async fn exchange(&self, req: HttpRequest) -> Result<HttpResponse> {
        let outgoing = build_request(req)?;

        let sent_at = Instant::now();
        let (head, body) = self.pool.request(outgoing).await?.into_parts();
        let time_to_head = sent_at.elapsed();

        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: head.status.as_u16(),
            headers: flatten_headers(&head.headers),
            body,
            time_to_head,
        })
    }
}

fn build_request(req: HttpRequest) -> Result<Request<Full<Bytes>>> {
    let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::UnsupportedScheme(req.url));
    }
    let uri: hyper::Uri = req
        .url
        .parse()
        .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

    let mut builder = Request::builder().method(req.method).uri(uri);

    if !has_header(&req.headers, "host")
        && let Some(host) = host_header_value(&parsed)
    {
        builder = builder.header(http::header::HOST, host);
    }
    if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
        builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
    }
    for (name, value) in &req.headers {
        builder = builder.header(
            http::header::HeaderName::from_bytes(name.as_bytes())?,
            http::header::HeaderValue::from_str(value)?,
        );
    }

    Ok(builder.body(Full::new(req.body))?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)));
        let req = HttpRequest::get("http://192.0.2.1:81/");

        let started = Instant::now();
        let _err = client.request(req).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(
            elapsed < Duration::from_secs(2),
            "expected fast failure, elapsed={elapsed:?}"
        );
    }

    #[tokio::test]
    async fn silent_server_hits_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            // Hold the socket open without ever answering.
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(sock);
        });

        let client = HttpClient::default();
        let req = HttpRequest::get(format!("http://{addr}/")).with_timeout(Duration::from_millis(150));
        let err = client.request(req).await.unwrap_err();

        assert!(err.is_timeout(), "expected timeout, got {err}");
        accept.abort();
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let client = HttpClient::default();
        let err = client.get("ftp://example.com/file").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(_)));
    }

    #[test]
    fn build_request_fills_host_and_content_length() {
        let req = HttpRequest::post("http://127.0.0.1:9000/login", Bytes::from_static(b"{}"))
            .with_header("content-type", "application/json");
        let built = build_request(req).unwrap();

        assert_eq!(built.headers()[http::header::HOST], "127.0.0.1:9000");
        assert_eq!(built.headers()[http::header::CONTENT_LENGTH], "2");
        assert_eq!(*built.method(), http::Method::POST);
    }

    #[test]
    fn build_request_rejects_bad_header_names() {
        let req = HttpRequest::get("http://127.0.0.1/").with_header("bad header", "x");
        assert!(matches!(build_request(req), Err(Error::HeaderName(_))));
    }

    #[tokio::test]
    async fn unbuildable_requests_are_not_transport_failures() {
        let client = HttpClient::default();

        let err = client
            .request(HttpRequest::get("http://127.0.0.1:1/").with_header("x-note", "a\nb"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HeaderValue(_)));
        assert!(err.is_invalid_request());

        let err = client.get("http://[::1/").await.unwrap_err();
        assert!(err.is_invalid_request());

        let err = client
            .request(HttpRequest::get("http://192.0.2.1:81/").with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(!err.is_invalid_request());
    }
}
