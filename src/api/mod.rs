//! Inbound market-data endpoints.
//!
//! | Route        | Upstream                          | Window  |
//! |--------------|-----------------------------------|---------|
//! | `/coins`     | `/coins/markets` (page or ids)    | coins   |
//! | `/coin/:id`  | `/coins/{id}`                     | coins   |
//! | `/global`    | `/global`                         | global  |
//! | `/trending`  | `/search/trending`                | coins   |
//!
//! Successful responses carry the upstream JSON bytes unchanged. Any gateway
//! failure becomes `500` with `{"error": ..., "details": ...}`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::{Gateway, Payload};
use crate::context::Context;
use crate::error::GatewayError;
use crate::middleware::{LoggerMiddleware, Pipeline, from_middleware};
use crate::router::Router;
use crate::upstream::{CoinsQuery, DEFAULT_ORDER, Endpoints, Fetcher};
use crate::{Response, StatusCode};

/// Freshness windows per resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    /// Coin listings, coin details and trending.
    pub coins: Duration,
    /// Global aggregate statistics.
    pub global: Duration,
}

impl Default for Freshness {
    fn default() -> Self {
        Self {
            coins: Duration::from_secs(30),
            global: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn error_response(status: StatusCode, error: &str, details: Option<String>) -> Response {
    Response::new(status).json(&ErrorBody { error, details })
}

fn respond(outcome: Result<Payload, GatewayError>, failure: &str) -> Response {
    match outcome {
        Ok(payload) => Response::new(StatusCode::Ok).json_bytes(payload.into_bytes()),
        Err(e) => error_response(
            StatusCode::InternalServerError,
            failure,
            Some(e.to_string()),
        ),
    }
}

/// Rejected `/coins` query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPage;

/// Reads `/coins` parameters. A non-empty `ids` wins over `page` and `order`.
pub fn coins_query(ctx: &Context) -> Result<CoinsQuery, InvalidPage> {
    if let Some(ids) = ctx.query("ids").filter(|ids| !ids.is_empty()) {
        return Ok(CoinsQuery::Ids(ids.to_owned()));
    }

    let page = match ctx.query("page") {
        None => 1,
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|page| *page > 0)
            .ok_or(InvalidPage)?,
    };
    let order = ctx
        .query("order")
        .filter(|order| !order.is_empty())
        .unwrap_or(DEFAULT_ORDER);

    Ok(CoinsQuery::Page {
        page,
        order: order.to_owned(),
    })
}

/// Shared state behind every endpoint.
pub struct CoinApi {
    gateway: Gateway,
    endpoints: Endpoints,
    fetcher: Arc<dyn Fetcher>,
    freshness: Freshness,
}

impl CoinApi {
    pub fn new(
        gateway: Gateway,
        endpoints: Endpoints,
        fetcher: Arc<dyn Fetcher>,
        freshness: Freshness,
    ) -> Self {
        Self {
            gateway,
            endpoints,
            fetcher,
            freshness,
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    async fn resolve(&self, url: &str, window: Duration) -> Result<Payload, GatewayError> {
        self.gateway
            .resolve(url, window, Arc::clone(&self.fetcher))
            .await
    }

    pub async fn coins(self: Arc<Self>, ctx: Context) -> Response {
        let query = match coins_query(&ctx) {
            Ok(query) => query,
            Err(InvalidPage) => {
                return error_response(StatusCode::BadRequest, "Invalid page parameter", None);
            }
        };
        let url = self.endpoints.coins(&query);
        respond(
            self.resolve(&url, self.freshness.coins).await,
            "Failed to fetch coins",
        )
    }

    pub async fn coin(self: Arc<Self>, ctx: Context) -> Response {
        let Some(id) = ctx.params().get("id") else {
            return Response::new(StatusCode::NotFound).body("Not Found");
        };
        let url = self.endpoints.coin(id);
        respond(
            self.resolve(&url, self.freshness.coins).await,
            "Failed to fetch coin details",
        )
    }

    pub async fn global(self: Arc<Self>, _ctx: Context) -> Response {
        let url = self.endpoints.global();
        respond(
            self.resolve(&url, self.freshness.global).await,
            "Failed to fetch global data",
        )
    }

    pub async fn trending(self: Arc<Self>, _ctx: Context) -> Response {
        let url = self.endpoints.trending();
        respond(
            self.resolve(&url, self.freshness.coins).await,
            "Failed to fetch trending coins",
        )
    }
}

// Adapts a `CoinApi` method into a router handler.
fn with_api<F, Fut>(
    api: &Arc<CoinApi>,
    handler: F,
) -> impl Fn(Context) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<CoinApi>, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let api = Arc::clone(api);
    move |ctx: Context| handler(Arc::clone(&api), ctx)
}

/// Registers every endpoint.
pub fn router(api: &Arc<CoinApi>) -> Router {
    let mut router = Router::new();
    router.get("/coins", with_api(api, CoinApi::coins));
    router.get("/coin/:id", with_api(api, CoinApi::coin));
    router.get("/global", with_api(api, CoinApi::global));
    router.get("/trending", with_api(api, CoinApi::trending));
    router
}

/// The router wrapped in request logging.
pub fn pipeline(api: &Arc<CoinApi>) -> Pipeline {
    Pipeline::new(router(api)).layer(from_middleware(Arc::new(LoggerMiddleware)))
}
