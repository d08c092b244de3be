use std::time::Instant;

use actix_web::http::header::{self as actix_header, HeaderMap as ActixHeaderMap};
use actix_web::http::StatusCode;
use actix_web::{body::SizedStream, web, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use crate::auth::VerifyError;
use crate::dispatch::RequestContext;
use crate::error::GatewayError;
use crate::metrics::{PROXY_LATENCY, PROXY_REQUESTS_TOTAL, UPSTREAM_ERRORS};
use crate::router::{ResolvedRoute, RouteTarget};

/// Hop-by-hop headers never forwarded in either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers the gateway always sets itself.
const GATEWAY_OWNED_HEADERS: &[&str] = &[
    "host",
    "forwarded",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    IDENTITY_HEADER,
    REQUEST_ID_HEADER,
];

/// Carries the verified subject to upstreams. Client-supplied values are dropped.
pub const IDENTITY_HEADER: &str = "x-user-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Buffered chunks between the client payload and the upstream body.
const BODY_CHANNEL_DEPTH: usize = 8;

/// Everything needed to issue the upstream request, computed without I/O.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: reqwest::Method,
    pub url: Url,
    /// Authority of the upstream, also set as the `Host` header
    pub host: String,
    pub headers: HeaderMap,
    /// Whether the inbound request declared a body to stream
    pub has_body: bool,
}

pub type BodyStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Post-processing applied to upstream responses before they reach the client.
pub trait ResponseHook: Send + Sync {
    fn rewrite_headers(&self, _route: &RouteTarget, _status: u16, _headers: &mut HeaderMap) {}

    fn rewrite_body(&self, _route: &RouteTarget, body: BodyStream) -> BodyStream {
        body
    }

    /// False when `rewrite_body` may change the body length, so the upstream
    /// `Content-Length` is not reused.
    fn preserves_length(&self) -> bool {
        true
    }
}

/// Default hook: responses pass through unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl ResponseHook for PassThrough {}

/// Build the upstream request for an inbound request and its resolved route.
pub fn build_outbound(
    req: &HttpRequest,
    resolved: &ResolvedRoute<'_>,
    ctx: &RequestContext,
) -> Result<OutboundRequest, GatewayError> {
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|_| GatewayError::BadRequest("unsupported HTTP method".to_string()))?;

    let mut url = resolved.target.upstream.clone();
    let joined = format!(
        "{}{}",
        url.path().trim_end_matches('/'),
        resolved.rewritten_path
    );
    url.set_path(&joined);
    let query = req.query_string();
    url.set_query((!query.is_empty()).then_some(query));

    let host = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        (Some(h), None) => h.to_string(),
        (None, _) => {
            return Err(GatewayError::Internal(format!(
                "upstream {} has no host",
                resolved.target.upstream
            )))
        }
    };

    let connection_tokens = connection_tokens(req.headers());
    let mut headers = HeaderMap::new();
    for (name, value) in req.headers().iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str())
            || GATEWAY_OWNED_HEADERS.contains(&lower.as_str())
            || connection_tokens.contains(&lower)
        {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(n, v);
        }
    }

    // Re-assert Authorization so it reaches the upstream even if the
    // transport layer dropped it.
    if let Some(auth) = req.headers().get(actix_header::AUTHORIZATION) {
        if let Ok(v) = HeaderValue::from_bytes(auth.as_bytes()) {
            headers.insert(reqwest::header::AUTHORIZATION, v);
        }
    }

    insert_str(&mut headers, reqwest::header::HOST, &host)?;
    insert_str(
        &mut headers,
        HeaderName::from_static(REQUEST_ID_HEADER),
        &ctx.request_id,
    )?;

    if let Some(ref identity) = ctx.identity {
        let value = HeaderValue::from_str(&identity.subject).map_err(|_| {
            GatewayError::Unauthorized(VerifyError::InvalidToken(
                "subject is not a valid header value".to_string(),
            ))
        })?;
        headers.insert(HeaderName::from_static(IDENTITY_HEADER), value);
    }

    let forwarded_for = match (
        req.headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok()),
        req.peer_addr(),
    ) {
        (Some(prior), Some(peer)) => Some(format!("{}, {}", prior, peer.ip())),
        (None, Some(peer)) => Some(peer.ip().to_string()),
        (Some(prior), None) => Some(prior.to_string()),
        (None, None) => None,
    };
    if let Some(value) = forwarded_for {
        insert_str(&mut headers, HeaderName::from_static("x-forwarded-for"), &value)?;
    }
    // Taken from the connection itself, never from client forwarding headers
    let inbound_host = req
        .headers()
        .get(actix_header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()));
    if let Some(value) = inbound_host {
        insert_str(&mut headers, HeaderName::from_static("x-forwarded-host"), &value)?;
    }
    let scheme = if req.app_config().secure() { "https" } else { "http" };
    insert_str(&mut headers, HeaderName::from_static("x-forwarded-proto"), scheme)?;

    Ok(OutboundRequest {
        method,
        url,
        host,
        headers,
        has_body: declares_body(req.headers()),
    })
}

/// Execute `outbound`, streaming `payload` up and the response body back.
pub async fn forward(
    client: &reqwest::Client,
    outbound: OutboundRequest,
    payload: web::Payload,
    route: &RouteTarget,
    hook: &dyn ResponseHook,
) -> Result<HttpResponse, GatewayError> {
    PROXY_REQUESTS_TOTAL.with_label_values(&[&route.name]).inc();
    let started = Instant::now();

    let is_head = outbound.method == reqwest::Method::HEAD;
    let mut request = client
        .request(outbound.method, outbound.url)
        .headers(outbound.headers);
    if outbound.has_body {
        request = request.body(stream_payload(payload));
    }

    let response = request
        .send()
        .await
        .map_err(|e| upstream_error(&route.name, e))?;
    PROXY_LATENCY.observe(started.elapsed().as_secs_f64());

    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|_| GatewayError::UpstreamUnavailable("invalid upstream status".to_string()))?;
    let content_length = response.content_length();

    let mut headers = response.headers().clone();
    let declared_length = headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    strip_response_headers(&mut headers, is_head);
    hook.rewrite_headers(route, status.as_u16(), &mut headers);

    let mut builder = HttpResponse::build(status);
    for (name, value) in headers.iter() {
        if let (Ok(n), Ok(v)) = (
            actix_header::HeaderName::from_bytes(name.as_str().as_bytes()),
            actix_header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder.append_header((n, v));
        }
    }

    if matches!(
        status,
        StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED
    ) {
        return Ok(builder.finish());
    }

    // No body follows a HEAD response, but its length describes the GET body
    if is_head {
        return Ok(match declared_length {
            Some(len) => builder.body(SizedStream::new(
                len,
                futures::stream::empty::<Result<Bytes, reqwest::Error>>(),
            )),
            None => builder.finish(),
        });
    }

    let body = hook.rewrite_body(route, response.bytes_stream().boxed());
    match content_length {
        Some(len) if hook.preserves_length() => Ok(builder.body(SizedStream::new(len, body))),
        _ => Ok(builder.streaming(body)),
    }
}

/// Relay the client payload through a channel so the upstream body is `Send`.
/// Dropping the upstream request closes the channel and stops the relay.
fn stream_payload(mut payload: web::Payload) -> reqwest::Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(BODY_CHANNEL_DEPTH);

    actix_web::rt::spawn(async move {
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });

    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

fn upstream_error(route: &str, e: reqwest::Error) -> GatewayError {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "request"
    };
    UPSTREAM_ERRORS.with_label_values(&[route, kind]).inc();
    tracing::error!(route = %route, kind, error = %e, "upstream request failed");

    if e.is_timeout() {
        GatewayError::UpstreamTimeout(format!("{}: {}", route, e))
    } else {
        GatewayError::UpstreamUnavailable(format!("{}: {}", route, e))
    }
}

/// `keep_length` keeps `Content-Length`, which actix otherwise recomputes from
/// the body it sends.
fn strip_response_headers(headers: &mut HeaderMap, keep_length: bool) {
    let named_in_connection: Vec<String> = headers
        .get_all(reqwest::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    for name in HOP_BY_HOP_HEADERS.iter().copied().chain(named_in_connection.iter().map(String::as_str)) {
        headers.remove(name);
    }
    if !keep_length {
        headers.remove(reqwest::header::CONTENT_LENGTH);
    }
}

fn connection_tokens(headers: &ActixHeaderMap) -> Vec<String> {
    headers
        .get_all(actix_header::CONNECTION)
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn declares_body(headers: &ActixHeaderMap) -> bool {
    if headers.contains_key(actix_header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(actix_header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

fn insert_str(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), GatewayError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| GatewayError::BadRequest(format!("invalid value for header {}", name)))?;
    headers.insert(name, value);
    Ok(())
}
