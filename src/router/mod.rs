//! Request routing: map URL patterns to read-only handler functions.
//!
//! Two pattern styles are supported:
//!
//! | Pattern       | Example match    | Captured params   |
//! |---------------|------------------|-------------------|
//! | `/global`     | `/global`        | *(none)*          |
//! | `/coin/:id`   | `/coin/bitcoin`  | `id → "bitcoin"`  |
//!
//! Captured parameters are percent-decoded, so `/coin/a%20b` captures `a b`.
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so `/coins/` and
//! `/coins` are treated as equivalent.
//!
//! The gateway only exposes reads: routes are registered with [`Router::get`] and also
//! answer `HEAD` (same handler, body suppressed). A path that matches a route but arrives
//! with another method gets `405 Method Not Allowed`; an unknown path gets `404 Not Found`.

use std::pin::Pin;
use std::sync::Arc;

use percent_encoding::percent_decode_str;

use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    /// Compiles a pattern string: anything containing `:` is parameterized,
    /// everything else is an exact match.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();

            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            let value = percent_decode_str(path_seg).decode_utf8_lossy();
                            params.insert(name.clone(), value.into_owned());
                        }
                    }
                }
                Some(params)
            }
        }
    }
}

struct Route {
    pattern: Pattern,
    handler: Handler,
}

/// Dispatches requests to the first registered route whose pattern matches.
///
/// # Examples
///
/// ```rust,no_run
/// use coingate::{Router, Response, StatusCode, context::Context};
///
/// let mut router = Router::new();
/// router.get("/coin/:id", |ctx: Context| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `GET` (and `HEAD`) requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` to the first matching route and returns its response.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self
            .routes
            .iter()
            .find_map(|route| route.pattern.matches(request.path()).map(|p| (route, p)));

        let Some((route, params)) = matched else {
            return Response::new(StatusCode::NotFound).body("Not Found");
        };

        let head_only = match request.method() {
            Method::Get => false,
            Method::Head => true,
            Method::Other(_) => {
                return Response::new(StatusCode::MethodNotAllowed)
                    .header("Allow", "GET, HEAD")
                    .body("Method Not Allowed");
            }
        };

        let ctx = Context::with_params(request, params);
        (route.handler)(ctx).await.head_only(head_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn body_of(res: Response) -> String {
        String::from_utf8(res.body_bytes().to_vec()).unwrap()
    }

    #[test]
    fn pattern_parse_exact_and_trailing_slash() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
        assert!(matches!(Pattern::parse("/coins/"), Pattern::Exact(s) if s == "/coins"));
    }

    #[test]
    fn pattern_parse_parameterized() {
        match Pattern::parse("/coin/:id") {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 2);
                assert!(matches!(&segments[0], Segment::Static(s) if s == "coin"));
                assert!(matches!(&segments[1], Segment::Parameter(s) if s == "id"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn pattern_exact_matching() {
        let pat = Pattern::parse("/global");
        assert!(pat.matches("/global").is_some());
        assert!(pat.matches("/global/").is_some());
        assert!(pat.matches("/coins").is_none());
    }

    #[test]
    fn pattern_param_extracts_value() {
        let pat = Pattern::parse("/coin/:id");
        let params = pat.matches("/coin/ethereum").unwrap();
        assert_eq!(params.get("id"), Some("ethereum"));
    }

    #[test]
    fn pattern_param_is_percent_decoded() {
        let pat = Pattern::parse("/coin/:id");
        let params = pat.matches("/coin/a%20b%2Fc").unwrap();
        assert_eq!(params.get("id"), Some("a b/c"));
        // Invalid UTF-8 is replaced rather than rejected.
        let params = pat.matches("/coin/%FF").unwrap();
        assert_eq!(params.get("id"), Some("\u{FFFD}"));
    }

    #[test]
    fn pattern_param_segment_mismatch() {
        let pat = Pattern::parse("/coin/:id");
        assert!(pat.matches("/coin").is_none());
        assert!(pat.matches("/coin/bitcoin/extra").is_none());
        assert!(pat.matches("/coins/bitcoin").is_none());
    }

    #[test]
    fn router_len() {
        let mut router = Router::new();
        assert!(router.is_empty());
        router.get("/a", |_ctx| async { Response::new(StatusCode::Ok) });
        router.get("/b/:x", |_ctx| async { Response::new(StatusCode::Ok) });
        assert_eq!(router.len(), 2);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let mut router = Router::new();
        router.get("/global", |_ctx| async { Response::new(StatusCode::Ok) });
        let res = router.route(make_request("GET", "/nope")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn known_path_wrong_method_is_405() {
        let mut router = Router::new();
        router.get("/global", |_ctx| async { Response::new(StatusCode::Ok) });
        let res = router.route(make_request("POST", "/global")).await;
        assert_eq!(res.status(), StatusCode::MethodNotAllowed);
        assert_eq!(res.headers().get("allow"), Some("GET, HEAD"));
    }

    #[tokio::test]
    async fn param_reaches_handler() {
        let mut router = Router::new();
        router.get("/coin/:id", |ctx: Context| async move {
            let id = ctx.params().get("id").unwrap_or("").to_owned();
            Response::new(StatusCode::Ok).body(id)
        });
        let res = router.route(make_request("GET", "/coin/solana")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(body_of(res), "solana");
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/coin/:id", |_ctx| async { Response::new(StatusCode::Ok) });
        router.get("/coin/:slug", |_ctx| async {
            Response::new(StatusCode::NoContent)
        });
        let res = router.route(make_request("GET", "/coin/x")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn head_uses_get_handler_without_body() {
        let mut router = Router::new();
        router.get("/global", |_ctx| async {
            Response::new(StatusCode::Ok).json_bytes(&b"{}"[..])
        });
        let res = router.route(make_request("HEAD", "/global")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        let wire = res.into_bytes();
        assert!(wire.ends_with(b"\r\n\r\n"));
    }
}
