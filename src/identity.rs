//! Caller identity for throttle keys.
//!
//! Authentication happens elsewhere: whatever verifies a session inserts an
//! [`AuthenticatedUser`] into the request extensions before the guard runs.
//! Requests without one are anonymous and keyed on their network origin.

use axum::extract::{ConnectInfo, Request};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

const UNKNOWN_ORIGIN: &str = "unknown";

/// Verified caller attached by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

impl AuthenticatedUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityClass {
    Authenticated,
    Anonymous,
}

impl IdentityClass {
    /// Key segment for this class. Distinct per class so buckets never collide.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityClass::Authenticated => "user",
            IdentityClass::Anonymous => "ip",
        }
    }
}

impl fmt::Display for IdentityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub class: IdentityClass,
    pub identifier: String,
}

impl CallerIdentity {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            class: IdentityClass::Authenticated,
            identifier: user_id.into(),
        }
    }

    pub fn anonymous(origin: impl Into<String>) -> Self {
        Self {
            class: IdentityClass::Anonymous,
            identifier: origin.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.class == IdentityClass::Authenticated
    }
}

/// Derives the caller identity from a request. Never authenticates anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityDeriver {
    trust_proxy_headers: bool,
}

impl IdentityDeriver {
    pub fn new(trust_proxy_headers: bool) -> Self {
        Self {
            trust_proxy_headers,
        }
    }

    pub fn derive<B>(&self, request: &Request<B>) -> CallerIdentity {
        match request.extensions().get::<AuthenticatedUser>() {
            Some(user) => CallerIdentity::authenticated(user.id.clone()),
            None => CallerIdentity::anonymous(self.client_ip(request)),
        }
    }

    /// Network origin of the request.
    ///
    /// Forwarding headers are only consulted when the service sits behind a
    /// proxy that sets them; otherwise any client could pick its own bucket.
    pub fn client_ip<B>(&self, request: &Request<B>) -> String {
        if self.trust_proxy_headers {
            if let Some(ip) = forwarded_ip(request) {
                return ip;
            }
        }

        if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
            return addr.ip().to_string();
        }

        if let Some(addr) = request.extensions().get::<SocketAddr>() {
            return addr.ip().to_string();
        }

        UNKNOWN_ORIGIN.to_string()
    }
}

fn forwarded_ip<B>(request: &Request<B>) -> Option<String> {
    let headers = request.headers();

    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|value| value.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}
