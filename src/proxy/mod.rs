pub mod cookie;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use http::header::{HOST, InvalidHeaderValue, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::instrument;

use crate::constants::PROXY_ROUTE_PREFIX;
use cookie::{CookieMode, rewrite_set_cookie};

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Reverse proxy to the hosted backend that rewrites auth cookies on the way back
#[derive(Debug, Clone)]
pub struct BackendProxy {
    client: reqwest::Client,
    upstream: String,
    mode: CookieMode,
}

impl BackendProxy {
    pub fn new(upstream: &str, mode: CookieMode) -> ProxyResult<Self> {
        // redirects are the browser's business
        let client = reqwest::Client::builder().redirect(Policy::none()).build()?;

        Ok(Self {
            client,
            upstream: upstream.trim_end_matches('/').to_string(),
            mode,
        })
    }

    pub fn mode(&self) -> CookieMode {
        self.mode
    }

    fn upstream_url(&self, req: &Request) -> String {
        let path = req.uri().path();
        let path = path.strip_prefix(PROXY_ROUTE_PREFIX).unwrap_or(path);

        match req.uri().query() {
            Some(query) => format!("{}{path}?{query}", self.upstream),
            None => format!("{}{path}", self.upstream),
        }
    }

    /// Forwards a request upstream. The upstream status is passed through untouched.
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn forward(&self, req: Request) -> ProxyResult<Response> {
        let url = self.upstream_url(&req);
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES).await?;

        let mut headers = HeaderMap::with_capacity(parts.headers.len());
        for (name, value) in parts.headers.iter() {
            if name != HOST && !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let upstream_res = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream_res.status();
        tracing::debug!(%status, %url, "upstream responded");

        let mut response_headers = HeaderMap::with_capacity(upstream_res.headers().len());
        for (name, value) in upstream_res.headers().iter() {
            if is_hop_by_hop(name) {
                continue;
            }

            if name == SET_COOKIE {
                match value.to_str() {
                    Ok(raw) => {
                        let rewritten = rewrite_set_cookie(raw, self.mode);
                        response_headers.append(SET_COOKIE, HeaderValue::from_str(&rewritten)?);
                    }
                    Err(_) => {
                        tracing::warn!("dropping non-ascii set-cookie header from upstream");
                    }
                }
                continue;
            }

            response_headers.append(name.clone(), value.clone());
        }

        let bytes = upstream_res.bytes().await?;
        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;

        Ok(response)
    }
}

pub type ProxyResult<T> = core::result::Result<T, ProxyErr>;

#[derive(Debug, Error)]
pub enum ProxyErr {
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),

    #[error(transparent)]
    Upstream(#[from] reqwest::Error),

    #[error(transparent)]
    Header(#[from] InvalidHeaderValue),
}
