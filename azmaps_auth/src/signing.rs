//! Request signing primitives

use azmaps_tokens::{AccessTokenRef, SubscriptionKeyRef};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::AuthError;

/// The placeholder in request URLs replaced by the configured maps domain
pub const DOMAIN_PLACEHOLDER: &str = "{azMapsDomain}";

/// The resource that identity tokens are requested for
pub const DEFAULT_RESOURCE: &str = "https://atlas.microsoft.com/";

/// Header carrying the per-process session ID
pub const SESSION_ID_HEADER: &str = "session-id";

/// Header marking the request as originating from the map control
pub const REQUEST_ORIGIN_HEADER: &str = "ms-am-request-origin";

/// Value of the [request origin][REQUEST_ORIGIN_HEADER] header
pub const REQUEST_ORIGIN: &str = "MapControl";

/// Header identifying the SDK and the framework it targets
pub const MAP_AGENT_HEADER: &str = "map-agent";

/// Value of the [map agent][MAP_AGENT_HEADER] header
pub const MAP_AGENT: &str = concat!("MapControl/", env!("CARGO_PKG_VERSION"), " (Leaflet)");

/// Header carrying the Azure Maps account client ID
pub const CLIENT_ID_HEADER: &str = "x-ms-client-id";

/// Authorization scheme for bearer tokens
pub const BEARER_SCHEME: &str = "Bearer";

/// Authorization scheme for SAS tokens
pub const SAS_SCHEME: &str = "jwt-sas";

/// Query parameter carrying the subscription key
pub const SUBSCRIPTION_KEY_PARAM: &str = "subscription-key";

/// A request to be signed
#[derive(Clone, Debug, Default)]
pub struct RequestParameters {
    /// The request URL, possibly containing the [domain placeholder][DOMAIN_PLACEHOLDER]
    pub url: String,
    /// Headers to send with the request
    pub headers: HeaderMap,
}

impl RequestParameters {
    /// A request for `url` with no headers
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    pub(crate) fn substitute_domain(&mut self, domain: &str) {
        if self.url.contains(DOMAIN_PLACEHOLDER) {
            self.url = self.url.replacen(DOMAIN_PLACEHOLDER, domain, 1);
        }
    }

    pub(crate) fn set_header(&mut self, name: &'static str, value: &str) -> Result<(), AuthError> {
        let value = HeaderValue::from_str(value).map_err(|_| AuthError::InvalidHeader { name })?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(())
    }

    pub(crate) fn set_authorization(
        &mut self,
        scheme: &str,
        token: &AccessTokenRef,
    ) -> Result<(), AuthError> {
        let mut value = HeaderValue::from_str(&format!("{} {}", scheme, token.as_str())).map_err(
            |_| AuthError::InvalidHeader {
                name: "authorization",
            },
        )?;
        value.set_sensitive(true);
        self.headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }

    pub(crate) fn append_subscription_key(&mut self, key: &SubscriptionKeyRef) {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        self.url.push(separator);
        self.url.push_str(SUBSCRIPTION_KEY_PARAM);
        self.url.push('=');
        self.url.push_str(key.as_str());
    }
}
