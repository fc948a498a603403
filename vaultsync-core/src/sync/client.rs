//! HTTP client for the VaultSync server.
//!
//! All request and response bodies are msgpack except chunk transfer, which
//! is raw octet-stream. Every URL ends with a trailing slash; the server
//! treats its absence as a routing error.

use crate::error::{Error, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use url::Url;

const MSGPACK: &str = "application/msgpack";
const OCTET_STREAM: &str = "application/octet-stream";

/// Error body the server attaches to non-2xx responses.
#[derive(Debug, Deserialize)]
struct ServerErrorBody {
    #[allow(dead_code)]
    code: Option<String>,
    detail: Option<String>,
}

/// Connection to a VaultSync server. Cheap to share behind an `Arc`; the
/// auth token is interior-mutable so a refresh propagates to every manager
/// holding the client.
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    auth_token: RwLock<Option<String>>,
}

impl Client {
    /// Create a client for the given server URL.
    pub fn new(server_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(server_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            auth_token: RwLock::new(None),
        })
    }

    pub fn server_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// The `host[:port]` authority, as signed into login challenge
    /// responses.
    pub(crate) fn host(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub(crate) fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.auth_token.write() {
            *guard = token;
        }
    }

    fn token(&self) -> Option<String> {
        self.auth_token.read().ok().and_then(|guard| guard.clone())
    }

    /// Probe whether the URL points at a VaultSync-compatible server.
    pub async fn is_valid_server(&self) -> Result<bool> {
        match self
            .get("api/v1/authentication/is_vaultsync/", &[])
            .await
        {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        debug_assert!(path.ends_with('/'), "API paths must end with a slash");
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<(Vec<u8>, &'static str)>,
        accept: &'static str,
    ) -> Result<Vec<u8>> {
        let url = self.url(path, query)?;
        let mut request = self.http.request(method, url).header(ACCEPT, accept);

        if let Some(token) = self.token() {
            request = request.header(AUTHORIZATION, format!("Token {}", token));
        }
        if let Some((bytes, content_type)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(bytes);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            Err(map_status(status, &bytes))
        }
    }

    pub(crate) async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        self.send(Method::GET, path, query, None, MSGPACK).await
    }

    pub(crate) async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.send(Method::POST, path, query, Some((body, MSGPACK)), MSGPACK)
            .await
    }

    pub(crate) async fn put(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.send(Method::PUT, path, query, Some((body, MSGPACK)), MSGPACK)
            .await
    }

    pub(crate) async fn patch(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.send(Method::PATCH, path, query, Some((body, MSGPACK)), MSGPACK)
            .await
    }

    pub(crate) async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        self.send(Method::DELETE, path, query, None, MSGPACK).await
    }

    /// Upload a chunk ciphertext.
    pub(crate) async fn put_octet(&self, path: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        self.send(Method::PUT, path, &[], Some((body, OCTET_STREAM)), MSGPACK)
            .await
    }

    /// Download a chunk ciphertext.
    pub(crate) async fn get_octet(&self, path: &str) -> Result<Vec<u8>> {
        self.send(Method::GET, path, &[], None, OCTET_STREAM).await
    }
}

/// Translate an HTTP status into the corresponding error kind, carrying the
/// server-provided detail string when there is one.
fn map_status(status: StatusCode, body: &[u8]) -> Error {
    let detail = parse_detail(body);
    let code = status.as_u16();
    match code {
        401 => Error::Unauthorized(detail),
        403 => Error::PermissionDenied(detail),
        404 => Error::NotFound(detail),
        409 => Error::Conflict(detail),
        502 | 503 | 504 => Error::TemporaryServer {
            status: code,
            detail,
        },
        500..=599 => Error::Server {
            status: code,
            detail,
        },
        _ => Error::Http {
            status: code,
            detail,
        },
    }
}

fn parse_detail(body: &[u8]) -> String {
    if let Ok(parsed) = rmp_serde::from_slice::<ServerErrorBody>(body) {
        if let Some(detail) = parsed.detail {
            return detail;
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

pub(crate) fn msgpack_encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub(crate) fn msgpack_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let client = Client::new("https://sync.example.com/partition").unwrap();
        assert_eq!(client.server_url(), "https://sync.example.com/partition/");
    }

    #[test]
    fn url_joins_paths_and_query() {
        let client = Client::new("https://sync.example.com/").unwrap();
        let url = client
            .url(
                "api/v1/collection/abc/item/",
                &[("stoken", "tok".to_string()), ("limit", "5".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sync.example.com/api/v1/collection/abc/item/?stoken=tok&limit=5"
        );
    }

    #[test]
    fn host_includes_port_only_when_explicit() {
        let client = Client::new("https://sync.example.com/").unwrap();
        assert_eq!(client.host(), "sync.example.com");

        let client = Client::new("http://localhost:8000").unwrap();
        assert_eq!(client.host(), "localhost:8000");
    }

    #[test]
    fn invalid_server_url_is_a_programming_error() {
        assert!(matches!(
            Client::new("not a url"),
            Err(Error::Programming(_))
        ));
    }

    #[test]
    fn status_mapping_matches_the_contract() {
        let cases: &[(u16, fn(&Error) -> bool)] = &[
            (401, |e| matches!(e, Error::Unauthorized(_))),
            (403, |e| matches!(e, Error::PermissionDenied(_))),
            (404, |e| matches!(e, Error::NotFound(_))),
            (409, |e| matches!(e, Error::Conflict(_))),
            (502, |e| matches!(e, Error::TemporaryServer { status: 502, .. })),
            (503, |e| matches!(e, Error::TemporaryServer { status: 503, .. })),
            (504, |e| matches!(e, Error::TemporaryServer { status: 504, .. })),
            (500, |e| matches!(e, Error::Server { status: 500, .. })),
            (507, |e| matches!(e, Error::Server { status: 507, .. })),
            (418, |e| matches!(e, Error::Http { status: 418, .. })),
        ];

        for (code, check) in cases {
            let status = StatusCode::from_u16(*code).unwrap();
            let err = map_status(status, b"");
            assert!(check(&err), "status {} mapped to {:?}", code, err);
        }
    }

    #[test]
    fn detail_comes_from_msgpack_body_when_present() {
        #[derive(Serialize)]
        struct Body<'a> {
            code: &'a str,
            detail: &'a str,
        }
        let body = rmp_serde::to_vec_named(&Body {
            code: "stale_etag",
            detail: "wrong etag for item",
        })
        .unwrap();

        match map_status(StatusCode::CONFLICT, &body) {
            Error::Conflict(detail) => assert_eq!(detail, "wrong etag for item"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn detail_falls_back_to_raw_body() {
        match map_status(StatusCode::BAD_REQUEST, b"plain text oops") {
            Error::Http { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "plain text oops");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
