//! The HTTP seam: one request in, one fully-read response out.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE},
    Method, StatusCode,
};

use crate::error::{Error, Result};

pub(crate) const MIME_JOSE_JSON: &str = "application/jose+json";
pub(crate) const MIME_PROBLEM_JSON: &str = "application/problem+json";
pub(crate) const MIME_PEM_CHAIN: &str = "application/pem-certificate-chain";

/// A request as handed to an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,

    /// Sent verbatim as the `Content-Type` header; no charset is ever appended.
    pub content_type: Option<&'static str>,

    pub body: Option<String>,
}

impl HttpRequest {
    pub(crate) fn get(url: &str) -> Self {
        HttpRequest {
            method: Method::GET,
            url: url.to_owned(),
            content_type: None,
            body: None,
        }
    }

    pub(crate) fn head(url: &str) -> Self {
        HttpRequest {
            method: Method::HEAD,
            ..Self::get(url)
        }
    }

    pub(crate) fn post_jose(url: &str, body: String) -> Self {
        HttpRequest {
            method: Method::POST,
            url: url.to_owned(),
            content_type: Some(MIME_JOSE_JSON),
            body: Some(body),
        }
    }
}

/// A response with its body read to the end.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The media type without parameters, lowercased.
    pub(crate) fn media_type(&self) -> Option<String> {
        let content_type = self.header(CONTENT_TYPE.as_str())?;
        let media_type = content_type.split(';').next().unwrap_or_default();
        Some(media_type.trim().to_ascii_lowercase())
    }
}

/// The capability every network exchange goes through.
///
/// Implemented for [`reqwest::Client`]; tests substitute a scripted double.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl HttpClient for reqwest::Client {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            content_type,
            body,
        } = request;

        let network = |source: reqwest::Error| Error::Network {
            url: url.clone(),
            source: Box::new(source),
        };

        let mut req = self.request(method, &url);
        if let Some(content_type) = content_type {
            req = req.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = body {
            log::trace!("{url} {body}");
            req = req.body(body);
        }

        let res = req.send().await.map_err(network)?;
        let status = res.status();
        let headers = res.headers().clone();

        // Let's Encrypt sometimes closes the TLS session abruptly after sending the full body.
        let body = match res.text().await {
            Ok(body) => body,
            Err(err) if status.is_success() => return Err(network(err)),
            Err(err) => {
                log::debug!("Failed to read error body from {url}: {err}");
                String::new()
            }
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Turns non-success responses into errors.
///
/// A problem document takes priority over the bare HTTP status.
pub(crate) fn handle_error(url: &str, res: HttpResponse) -> Result<HttpResponse> {
    if res.status.is_success() {
        return Ok(res);
    }

    let status = res.status.as_u16();

    if res.media_type().as_deref() == Some(MIME_PROBLEM_JSON) {
        let mut problem = serde_json::from_str::<crate::api::Problem>(&res.body)
            .map_err(|err| Error::invalid_response("problem", url, err))?;
        problem.raw_json = Some(res.body);

        log::debug!("Problem from {url}: {problem}");
        return Err(problem.into_error(status));
    }

    Err(Error::Http {
        url: url.to_owned(),
        status,
        body: res.body,
    })
}
