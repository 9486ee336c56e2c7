//! Caller resolution middleware.
//!
//! Every request is attributed either to a registered user, found by API key,
//! or to an anonymous client address. Handlers read the result from the
//! `AuthExtension` request extension.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::user::Contributor;
use crate::services::task_run_service::Caller;

/// Address recorded when neither a proxy header nor the peer address is known.
const UNKNOWN_ADDR: &str = "unknown";

#[derive(Debug, Clone)]
pub struct AuthExtension {
    /// `None` for anonymous callers
    pub user_id: Option<i64>,
    pub is_admin: bool,
    /// Client address from the socket, or `X-Forwarded-For` behind a trusted proxy
    pub remote_addr: String,
}

impl AuthExtension {
    pub fn anonymous(remote_addr: impl Into<String>) -> Self {
        Self {
            user_id: None,
            is_admin: false,
            remote_addr: remote_addr.into(),
        }
    }

    pub fn contributor(&self) -> Contributor {
        match self.user_id {
            Some(id) => Contributor::User(id),
            None => Contributor::Anonymous(self.remote_addr.clone()),
        }
    }

    pub fn caller(&self) -> Caller {
        Caller {
            contributor: self.contributor(),
            is_admin: self.is_admin,
        }
    }

    /// Registered user id, or 401 for anonymous callers.
    pub fn require_user(&self) -> Result<i64> {
        self.user_id
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

/// API key from the `api_key` query parameter or the `Authorization` header.
///
/// The header may carry the bare key or `Bearer <key>`.
fn extract_api_key(request: &Request<Body>) -> Option<String> {
    if let Ok(Query(query)) = Query::<ApiKeyQuery>::try_from_uri(request.uri()) {
        if let Some(key) = query.api_key.filter(|k| !k.is_empty()) {
            return Some(key);
        }
    }

    let value = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();
    let key = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!key.is_empty()).then(|| key.to_string())
}

/// Peer address, or the first `X-Forwarded-For` entry when proxy headers
/// are trusted.
fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let forwarded = trust_proxy
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);
    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_ADDR.to_string())
}

/// Resolve the caller and attach an `AuthExtension` to the request.
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let remote_addr = client_addr(request.headers(), peer, state.config.trust_proxy_headers);

    let auth = match extract_api_key(&request) {
        Some(key) => {
            let user = state
                .store
                .get_user_by_api_key(&key)
                .await?
                .ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))?;
            AuthExtension {
                user_id: Some(user.id),
                is_admin: user.admin,
                remote_addr,
            }
        }
        None => AuthExtension::anonymous(remote_addr),
    };

    request.extensions_mut().insert(auth);
    Ok(next.run(request).await)
}
