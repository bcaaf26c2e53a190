//! Middleware to sign outgoing Azure Maps requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AuthenticationMiddleware`] in the middleware stack to sign
//! each outbound request with the credentials of an
//! [`AuthenticationManager`].
//!
//! Signing attaches the identification headers and the credentials required
//! by the manager's authentication type. For a subscription key, the key is
//! added to the query string.
//!
//! Any header already present on a request by the time that the middleware
//! executes is left in place, allowing overrides to be specified as required.
//!
//! ```
//! use azmaps_auth::{AuthenticationOptions, ManagerRegistry};
//! use azmaps_reqwest::AuthenticationMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let manager = ManagerRegistry::new()
//!     .get_instance(Some(AuthenticationOptions::subscription_key("key")))
//!     .unwrap();
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AuthenticationMiddleware::new(manager))
//!     .build();
//!
//! let req = client
//!     .get("https://atlas.microsoft.com/map/tile?api-version=2.1");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to sign requests only
//! conditionally. This is useful when a single middleware stack is shared
//! between Azure Maps and other backends, so that credentials are only ever
//! sent to the maps host.
//!
//! ```
//! use azmaps_auth::{AuthenticationOptions, ManagerRegistry};
//! use azmaps_reqwest::{AuthenticationMiddleware, ExactHostMatch, HttpsOnly};
//! use predicates::prelude::PredicateBooleanExt;
//!
//! let manager = ManagerRegistry::new()
//!     .get_instance(Some(AuthenticationOptions::subscription_key("key")))
//!     .unwrap();
//!
//! AuthenticationMiddleware::new(manager)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("atlas.microsoft.com")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use azmaps_auth::{AuthenticationManager, RequestParameters};
use predicates::{prelude::*, reflection};
use reqwest::{Request, Response, Url};
use reqwest_middleware::{Error, Middleware, Next, Result};

/// A middleware that signs outgoing requests through an authentication manager
#[derive(Clone, Debug)]
pub struct AuthenticationMiddleware<P> {
    manager: AuthenticationManager,
    predicate: P,
}

impl AuthenticationMiddleware<HttpsOnly> {
    /// Construct a new middleware from an authentication manager
    ///
    /// By default, this middleware will only sign a request if it is being
    /// sent via HTTPS. To change this behavior, provide a custom predicate
    /// with [`with_predicate()`][Self::with_predicate()].
    pub fn new(manager: AuthenticationManager) -> Self {
        Self {
            manager,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AuthenticationMiddleware<P> {
        AuthenticationMiddleware {
            manager: self.manager,
            predicate,
        }
    }
}

impl<P> AuthenticationMiddleware<P> {
    fn sign(&self, req: &mut Request) -> Result<()> {
        let signed = self
            .manager
            .sign_request(RequestParameters::new(req.url().as_str()))
            .map_err(|err| Error::Middleware(err.into()))?;

        if signed.url != req.url().as_str() {
            *req.url_mut() = Url::parse(&signed.url).map_err(|err| Error::Middleware(err.into()))?;
        }

        let headers = req.headers_mut();
        for (name, value) in signed.headers.iter() {
            headers.entry(name).or_insert_with(|| value.clone());
        }

        tracing::trace!(
            auth_type = %self.manager.auth_type(),
            "signed outgoing request"
        );

        Ok(())
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AuthenticationMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) {
            self.sign(&mut req)?;
        }

        next.run(req, extensions).await
    }
}

/// Builds the reflection case for a request whose `property` decided the outcome
fn deciding_case<'a>(
    predicate: &'a dyn reflection::PredicateReflection,
    result: bool,
    expected: bool,
    property: &'static str,
    value: &str,
) -> Option<reflection::Case<'a>> {
    if result == expected {
        return None;
    }

    let case = reflection::Case::new(Some(predicate), result)
        .add_product(reflection::Product::new(property, value.to_owned()));
    Some(case)
}

/// Signs a request only if it is sent over HTTPS
///
/// Subscription keys travel in the query string, so signing a plain HTTP
/// request would expose the key on the wire.
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let scheme = req.url().scheme();
        deciding_case(self, self.eval(req), expected, "scheme", scheme)
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("maps request is sent over https")
    }
}

/// Signs a request only if it targets the given maps host
///
/// Hosts are compared without regard to ASCII case.
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Matches requests to `host`
    pub fn new<S>(host: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            host: host.into().to_ascii_lowercase(),
        }
    }

    /// Matches requests to the maps domain configured on `manager`
    pub fn maps_domain_of(manager: &AuthenticationManager) -> Self {
        Self::new(manager.options().az_maps_domain.as_str())
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url()
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.host))
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let host = req.url().host_str().unwrap_or("<no host>");
        deciding_case(self, self.eval(req), expected, "host", host)
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "maps request targets host {}", self.host)
    }
}
