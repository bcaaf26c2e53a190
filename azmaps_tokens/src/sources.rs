//! Token sources

use crate::AccessToken;
use async_trait::async_trait;
use std::{error, fmt, future::Future};

/// The error type a token callback may fail with
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// A caller-supplied asynchronous source for tokens
///
/// Used by the anonymous and SAS authentication strategies. A typical
/// implementation fetches a token from a CORS protected endpoint owned by the
/// application.
#[async_trait]
pub trait TokenCallback: Send + Sync {
    /// Fetches a fresh token
    async fn fetch_token(&self) -> Result<AccessToken, BoxError>;
}

/// A token callback built from an asynchronous closure
pub struct FnTokenCallback<F> {
    f: F,
}

impl<F> FnTokenCallback<F> {
    /// Wraps an asynchronous closure as a token callback
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnTokenCallback<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FnTokenCallback").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> TokenCallback for FnTokenCallback<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<AccessToken, BoxError>> + Send,
{
    async fn fetch_token(&self) -> Result<AccessToken, BoxError> {
        (self.f)().await
    }
}

/// A token callback that always returns the same token
#[derive(Debug)]
pub struct ConstTokenCallback {
    token: AccessToken,
}

impl ConstTokenCallback {
    /// Constructs a callback that hands out the given token
    pub fn new(token: impl Into<AccessToken>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCallback for ConstTokenCallback {
    async fn fetch_token(&self) -> Result<AccessToken, BoxError> {
        Ok(self.token.clone())
    }
}
