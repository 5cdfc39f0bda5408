//! User session.
//!
//! Holds the bearer token for the backend. Created once at startup and
//! passed by reference; nothing else reads the token from the environment.

use std::fmt;
use tdash_ws::WsTransportFactory;
use tracing::{debug, info};

#[derive(Clone, Default)]
pub struct Session {
    token: Option<String>,
}

impl Session {
    /// Session without credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.trim().is_empty()).then_some(token),
        }
    }

    /// Read the token from the environment variable `var`.
    pub fn from_env(var: &str) -> Self {
        Self::from_lookup(var, |key| std::env::var(key).ok())
    }

    /// Read the token through `lookup`. Empty values count as unset.
    pub fn from_lookup(var: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup(var) {
            Some(token) if !token.trim().is_empty() => {
                info!(env = %var, "Session token loaded");
                Self { token: Some(token) }
            }
            _ => {
                debug!(env = %var, "No session token, connecting anonymously");
                Self::anonymous()
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Socket transport factory carrying this session's credentials.
    pub fn transport_factory(&self) -> WsTransportFactory {
        match &self.token {
            Some(token) => WsTransportFactory::new().with_bearer_token(token.clone()),
            None => WsTransportFactory::new(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
