//! Per-request pipeline: sanitize, route, authenticate, forward.

use std::fmt;

use actix_web::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use tracing::Instrument;

use crate::auth::{extract_bearer, TokenVerifier, VerifiedIdentity, VerifyError};
use crate::error::GatewayError;
use crate::metrics::{AUTH_FAILURES, REQUESTS_TOTAL};
use crate::proxy::{self, REQUEST_ID_HEADER};
use crate::state::AppState;
use crate::validation::sanitize_request_path;

/// Longest client-supplied request id that is reused rather than replaced.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Where a request is in the dispatch pipeline. `Complete` and the
/// `Rejected*`/`UpstreamFailed` variants are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    RouteSelected,
    Authenticated,
    Forwarded,
    Complete,
    RejectedBadRequest,
    RejectedUnauthorized,
    RejectedNotFound,
    UpstreamFailed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::RouteSelected => "route_selected",
            Stage::Authenticated => "authenticated",
            Stage::Forwarded => "forwarded",
            Stage::Complete => "complete",
            Stage::RejectedBadRequest => "rejected_bad_request",
            Stage::RejectedUnauthorized => "rejected_unauthorized",
            Stage::RejectedNotFound => "rejected_not_found",
            Stage::UpstreamFailed => "upstream_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Stage::Received | Stage::RouteSelected | Stage::Authenticated | Stage::Forwarded
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one request as it moves through [`dispatch`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Name of the selected route, once routing succeeded
    pub route: Option<String>,
    /// Set only after successful verification
    pub identity: Option<VerifiedIdentity>,
    pub stage: Stage,
}

impl RequestContext {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            route: None,
            identity: None,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, next: Stage) {
        tracing::debug!(from = %self.stage, to = %next, "dispatch stage");
        self.stage = next;
    }
}

/// Catch-all handler for every path not served locally.
pub async fn dispatch(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> HttpResponse {
    let mut ctx = RequestContext::new(request_id(&req));
    let span = tracing::info_span!(
        "dispatch",
        request_id = %ctx.request_id,
        method = %req.method(),
        path = %req.path(),
    );

    let result = run(&req, payload, &state, &mut ctx)
        .instrument(span.clone())
        .await;

    let mut response = match result {
        Ok(response) => {
            ctx.advance(Stage::Complete);
            response
        }
        Err(e) => {
            ctx.advance(e.stage());
            span.in_scope(|| {
                tracing::debug!(stage = %ctx.stage, error = %e, "request rejected");
            });
            e.error_response()
        }
    };

    REQUESTS_TOTAL
        .with_label_values(&[
            req.method().as_str(),
            ctx.route.as_deref().unwrap_or("none"),
            ctx.stage.as_str(),
        ])
        .inc();

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn run(
    req: &HttpRequest,
    payload: web::Payload,
    state: &AppState,
    ctx: &mut RequestContext,
) -> Result<HttpResponse, GatewayError> {
    let path = req.path();
    sanitize_request_path(path)?;

    let resolved = state
        .routes
        .resolve(path)
        .ok_or_else(|| GatewayError::RouteNotFound(path.to_string()))?;
    let target = resolved.target;
    ctx.route = Some(target.name.clone());
    ctx.advance(Stage::RouteSelected);

    if !target.allows(req.method()) {
        return Err(GatewayError::MethodNotAllowed {
            method: req.method().to_string(),
            path: path.to_string(),
        });
    }

    if target.requires_auth {
        if let Some(ref verifier) = state.verifier {
            let identity = authenticate(req, verifier)
                .await
                .map_err(|e| auth_failed(&target.name, e))?;

            tracing::debug!(route = %target.name, subject = %identity.subject, "authenticated");
            ctx.identity = Some(identity);
            ctx.advance(Stage::Authenticated);
        }
    }

    let outbound = proxy::build_outbound(req, &resolved, ctx)?;
    tracing::debug!(route = %target.name, upstream = %outbound.url, "forwarding");
    ctx.advance(Stage::Forwarded);

    proxy::forward(
        &state.http_client,
        outbound,
        payload,
        target,
        state.response_hook.as_ref(),
    )
    .await
}

async fn authenticate(
    req: &HttpRequest,
    verifier: &TokenVerifier,
) -> Result<VerifiedIdentity, VerifyError> {
    let token = extract_bearer(req.headers().get(AUTHORIZATION))?;
    verifier.verify(token).await
}

fn auth_failed(route: &str, e: VerifyError) -> GatewayError {
    AUTH_FAILURES.with_label_values(&[e.reason()]).inc();
    match &e {
        VerifyError::IntrospectionFailed(_) | VerifyError::KeyUnavailable(_) => {
            tracing::warn!(route = %route, reason = e.reason(), error = %e, "authentication failed");
        }
        _ => {
            tracing::debug!(route = %route, reason = e.reason(), error = %e, "authentication failed");
        }
    }
    GatewayError::Unauthorized(e)
}

/// Reuse a sane client-supplied `X-Request-Id`, otherwise mint one.
fn request_id(req: &HttpRequest) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_REQUEST_ID_LEN
                && id.bytes().all(|b| b.is_ascii_graphic())
        })
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
