//! Middleware pipeline: composable before/after logic around the router.
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`]: an ordered middleware stack terminated by a [`Router`].
//! - [`LoggerMiddleware`]: one `tracing` line per request.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, StatusCode, context::Context, router::Router};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
}

impl Next {
    pub fn new(middlewares: Arc<[MiddlewareHandler]>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If the chain is exhausted without any layer producing a response, a
    /// `500 Internal Server Error` is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass through (`next.run(ctx).await`), short-circuit by
/// returning a response directly, or decorate the downstream response.
/// They are shared across Tokio tasks and must not hold `&mut` state across
/// an `.await`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs method, path, status and duration of every request.
///
/// Successful responses are logged at `info`, failures at `warn`.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            let duration = start.elapsed();
            let status = response.status().as_u16();
            if response.status().is_success() {
                tracing::info!(%method, %path, status, ?duration, "request served");
            } else {
                tracing::warn!(%method, %path, status, ?duration, "request failed");
            }

            response
        })
    }
}

/// An ordered middleware stack with a [`Router`] as its innermost layer.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use coingate::{Router, middleware::{LoggerMiddleware, Pipeline, from_middleware}};
///
/// let pipeline = Pipeline::new(Router::new())
///     .layer(from_middleware(Arc::new(LoggerMiddleware)));
/// ```
pub struct Pipeline {
    layers: Vec<MiddlewareHandler>,
    router: Arc<Router>,
    chain: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        let router = Arc::new(router);
        let mut pipeline = Self {
            layers: Vec::new(),
            chain: Arc::from(Vec::new()),
            router,
        };
        pipeline.rebuild();
        pipeline
    }

    /// Appends a middleware; layers run in the order they were added.
    #[must_use]
    pub fn layer(mut self, middleware: MiddlewareHandler) -> Self {
        self.layers.push(middleware);
        self.rebuild();
        self
    }

    // The router is always the terminal handler of the chain.
    fn rebuild(&mut self) {
        let router = Arc::clone(&self.router);
        let terminal: MiddlewareHandler = Arc::new(
            move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let router = Arc::clone(&router);
                Box::pin(async move { router.route(ctx.into_request()).await })
            },
        );

        let mut chain = self.layers.clone();
        chain.push(terminal);
        self.chain = Arc::from(chain);
    }

    /// Runs `request` through every layer and the router.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.chain))
            .run(Context::new(request))
            .await
    }
}
