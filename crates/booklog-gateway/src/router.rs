//! Static prefix routing from request paths to upstream services.

use actix_web::http::Method;
use url::Url;

use crate::config::{ConfigError, GatewayConfig};
use crate::validation::{validate_route_prefix, validate_upstream_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Only the path itself
    Exact,
    /// The path and anything below it (`/books`, `/books/7`, not `/bookstore`)
    Prefix,
}

/// One static routing entry.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    /// Label used in logs and metrics
    pub name: String,
    pub prefix: String,
    pub match_kind: MatchKind,
    /// Upstream base URL; the rewritten path is appended to its path
    pub upstream: Url,
    /// Remove `prefix` before forwarding
    pub strip_prefix: bool,
    pub requires_auth: bool,
    /// Accepted methods; `None` accepts any
    pub methods: Option<Vec<Method>>,
}

impl RouteTarget {
    /// Authenticated resource route whose prefix is stripped.
    pub fn resource(name: &str, prefix: &str, upstream: &str) -> Result<Self, ConfigError> {
        Self::build(name, prefix, MatchKind::Prefix, upstream, true, true, None)
    }

    /// Unauthenticated single-path route forwarded with its path intact.
    pub fn public_exact(
        name: &str,
        path: &str,
        upstream: &str,
        method: Method,
    ) -> Result<Self, ConfigError> {
        Self::build(name, path, MatchKind::Exact, upstream, false, false, Some(vec![method]))
    }

    fn build(
        name: &str,
        prefix: &str,
        match_kind: MatchKind,
        upstream: &str,
        strip_prefix: bool,
        requires_auth: bool,
        methods: Option<Vec<Method>>,
    ) -> Result<Self, ConfigError> {
        validate_route_prefix(prefix)?;
        validate_upstream_url(upstream)?;
        let upstream = Url::parse(upstream).map_err(|_| ConfigError::InvalidUrl(upstream.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            match_kind,
            upstream,
            strip_prefix,
            requires_auth,
            methods,
        })
    }

    fn matches(&self, path: &str) -> bool {
        match self.match_kind {
            MatchKind::Exact => path == self.prefix,
            MatchKind::Prefix => path
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        }
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods
            .as_ref()
            .map_or(true, |methods| methods.contains(method))
    }

    /// Path the upstream receives for an inbound `path` this route matched.
    fn rewrite(&self, path: &str) -> String {
        let rewritten = if self.strip_prefix {
            &path[self.prefix.len()..]
        } else {
            path
        };
        if rewritten.is_empty() {
            "/".to_string()
        } else {
            rewritten.to_string()
        }
    }
}

/// Result of routing one path.
#[derive(Debug, Clone)]
pub struct ResolvedRoute<'a> {
    pub target: &'a RouteTarget,
    pub rewritten_path: String,
}

/// Validated, non-overlapping set of routes. Built once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<RouteTarget>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteTarget>) -> Result<Self, ConfigError> {
        for (i, a) in routes.iter().enumerate() {
            for b in &routes[i + 1..] {
                if prefixes_overlap(&a.prefix, &b.prefix) {
                    return Err(ConfigError::OverlappingRoutes(
                        a.prefix.clone(),
                        b.prefix.clone(),
                    ));
                }
            }
        }
        Ok(Self { routes })
    }

    /// Registration and login go to the identity service untouched; `/users`,
    /// `/books` and any `GATEWAY_ROUTES` entries are authenticated resources.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let mut routes = vec![
            RouteTarget::public_exact("register", "/register", &config.user_service_url, Method::POST)?,
            RouteTarget::public_exact("login", "/login", &config.user_service_url, Method::POST)?,
            RouteTarget::resource("users", "/users", &config.user_service_url)?,
            RouteTarget::resource("books", "/books", &config.book_service_url)?,
        ];
        for extra in &config.extra_routes {
            let name = extra.prefix.trim_start_matches('/');
            routes.push(RouteTarget::resource(name, &extra.prefix, &extra.upstream)?);
        }
        Self::new(routes)
    }

    /// Find the route for `path`. Prefixes never overlap, so at most one
    /// route can match.
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute<'_>> {
        self.routes
            .iter()
            .find(|route| route.matches(path))
            .map(|target| ResolvedRoute {
                target,
                rewritten_path: target.rewrite(path),
            })
    }

    pub fn routes(&self) -> &[RouteTarget] {
        &self.routes
    }
}

/// Equal prefixes, or one is a whole-segment prefix of the other.
fn prefixes_overlap(a: &str, b: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        inner
            .strip_prefix(outer)
            .is_some_and(|rest| rest.starts_with('/'))
    };
    a == b || nested(a, b) || nested(b, a)
}
