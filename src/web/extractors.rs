//! Request validation and parameter extraction.

use super::AppState;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Deserialize;

/// Per-request caller context.
///
/// `authenticated` feeds the response-cache key so cached payloads for
/// authenticated and anonymous callers stay separate. It is derived from
/// the optional `X-Api-Key` header and is not an access control.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub authenticated: bool,
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let authenticated = match (&state.config.web.api_key, parts.headers.get("x-api-key")) {
            (Some(expected), Some(provided)) => {
                provided.to_str().map(|v| v == expected).unwrap_or(false)
            }
            _ => false,
        };
        Ok(RequestContext { authenticated })
    }
}

/// Page/limit query parameters for listing endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PaginationParams {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_bounds() {
        let params = PaginationParams {
            page: None,
            limit: None,
        };
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 20);

        let params = PaginationParams {
            page: Some(0),
            limit: Some(1000),
        };
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 100);
    }
}
