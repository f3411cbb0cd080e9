//! Upstream URL construction.
//!
//! The URL string built here is also the cache key, so it must be
//! deterministic: parameters are always appended in the same order.

use url::Url;

use crate::config::ConfigError;

/// Page size used for paginated coin listings.
pub const PER_PAGE: u32 = 20;

/// Listing order when the caller does not pick one.
pub const DEFAULT_ORDER: &str = "market_cap_desc";

const QUOTE_CURRENCY: &str = "usd";

/// What a `/coins` request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoinsQuery {
    /// One page of the market listing.
    Page { page: u32, order: String },
    /// Specific coins by id (comma-separated); paging and ordering do not apply.
    Ids(String),
}

impl Default for CoinsQuery {
    fn default() -> Self {
        Self::Page {
            page: 1,
            order: DEFAULT_ORDER.to_owned(),
        }
    }
}

/// Builds upstream request URLs against a base such as
/// `https://api.coingecko.com/api/v3`.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// # Errors
    ///
    /// [`ConfigError::UpstreamUrl`] if `base` is not an absolute http(s) URL.
    pub fn new(base: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::UpstreamUrl {
            url: base.to_owned(),
            reason,
        };

        let url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(invalid("expected an http(s) base URL".to_owned()));
        }
        Ok(Self { base: url })
    }

    /// `/coins/markets` for a page of the listing or a set of ids.
    pub fn coins(&self, query: &CoinsQuery) -> String {
        match query {
            CoinsQuery::Page { page, order } => {
                let per_page = PER_PAGE.to_string();
                let page = page.to_string();
                self.build(
                    &["coins", "markets"],
                    &[
                        ("vs_currency", QUOTE_CURRENCY),
                        ("order", order.as_str()),
                        ("per_page", per_page.as_str()),
                        ("page", page.as_str()),
                        ("sparkline", "true"),
                        ("price_change_percentage", "24h"),
                    ],
                )
            }
            CoinsQuery::Ids(ids) => self.build(
                &["coins", "markets"],
                &[
                    ("vs_currency", QUOTE_CURRENCY),
                    ("ids", ids.as_str()),
                    ("sparkline", "true"),
                    ("price_change_percentage", "24h"),
                ],
            ),
        }
    }

    /// `/coins/{id}` with market data and the 7-day sparkline.
    pub fn coin(&self, id: &str) -> String {
        self.build(
            &["coins", id],
            &[
                ("localization", "false"),
                ("tickers", "false"),
                ("market_data", "true"),
                ("community_data", "false"),
                ("developer_data", "false"),
                ("sparkline", "true"),
            ],
        )
    }

    pub fn global(&self) -> String {
        self.build(&["global"], &[])
    }

    pub fn trending(&self) -> String {
        self.build(&["search", "trending"], &[])
    }

    fn build(&self, segments: &[&str], query: &[(&str, &str)]) -> String {
        let mut url = self.base.clone();
        // `new` rejects cannot-be-a-base URLs, so the segments are always editable.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new("https://api.coingecko.com/api/v3").unwrap()
    }

    #[test]
    fn coins_page_url() {
        assert_eq!(
            endpoints().coins(&CoinsQuery::Page {
                page: 2,
                order: "volume_desc".into()
            }),
            "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&order=volume_desc&per_page=20&page=2&sparkline=true&price_change_percentage=24h"
        );
    }

    #[test]
    fn coins_default_query() {
        assert_eq!(
            endpoints().coins(&CoinsQuery::default()),
            "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&order=market_cap_desc&per_page=20&page=1&sparkline=true&price_change_percentage=24h"
        );
    }

    #[test]
    fn coins_by_ids_encodes_commas() {
        assert_eq!(
            endpoints().coins(&CoinsQuery::Ids("bitcoin,ethereum".into())),
            "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&ids=bitcoin%2Cethereum&sparkline=true&price_change_percentage=24h"
        );
    }

    #[test]
    fn coin_detail_url() {
        assert_eq!(
            endpoints().coin("bitcoin"),
            "https://api.coingecko.com/api/v3/coins/bitcoin?localization=false&tickers=false&market_data=true&community_data=false&developer_data=false&sparkline=true"
        );
    }

    #[test]
    fn coin_id_is_path_encoded() {
        let url = endpoints().coin("a b/c");
        assert!(url.starts_with("https://api.coingecko.com/api/v3/coins/a%20b%2Fc?"));
    }

    #[test]
    fn aggregate_urls() {
        assert_eq!(endpoints().global(), "https://api.coingecko.com/api/v3/global");
        assert_eq!(
            endpoints().trending(),
            "https://api.coingecko.com/api/v3/search/trending"
        );
    }

    #[test]
    fn trailing_slash_on_base_is_tolerated() {
        let e = Endpoints::new("http://127.0.0.1:9000/api/v3/").unwrap();
        assert_eq!(e.global(), "http://127.0.0.1:9000/api/v3/global");
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(matches!(
            Endpoints::new("mailto:someone@example.com"),
            Err(ConfigError::UpstreamUrl { .. })
        ));
        assert!(Endpoints::new("not a url").is_err());
    }
}
