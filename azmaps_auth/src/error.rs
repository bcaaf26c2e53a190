use std::{error::Error, sync::Arc};

use azmaps_tokens::TokenDecodeError;
use thiserror::Error;

use crate::AuthenticationType;

/// The authentication options are incomplete or inconsistent
///
/// These errors are never retried. The caller must supply corrected options.
#[derive(Clone, Debug, Error)]
pub enum ConfigurationError {
    /// No options were given and no manager has been created yet
    #[error("Azure Maps credentials not specified")]
    CredentialsNotSpecified,
    /// The authentication type is not one that is supported
    #[error("`{0}` is not a valid authentication type")]
    InvalidAuthType(String),
    /// A field required by the chosen authentication type is missing
    #[error("no {field} was specified, but one is required for {auth_type} authentication")]
    MissingField {
        /// The missing field
        field: &'static str,
        /// The authentication type that requires the field
        auth_type: AuthenticationType,
    },
    /// No identity context was supplied and none can be created
    #[error("no identity context was supplied and no default identity context is available")]
    NoIdentityContext,
}

/// An error encountered while authenticating with Azure Maps
///
/// This error is cheap to clone so that the memoized outcome of initialization
/// can be handed to every caller.
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// The authentication options are unusable
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Interactive sign-in failed or was denied
    #[error("error logging in the user: {0}")]
    Login(String),
    /// The token source failed to produce a token
    #[error("unable to fetch an access token")]
    TokenFetch(#[source] Arc<dyn Error + Send + Sync + 'static>),
    /// A token was obtained, but its expiry could not be decoded
    #[error("invalid token returned by the token source")]
    InvalidToken(#[from] TokenDecodeError),
    /// A value could not be encoded as a header value
    #[error("value for the `{name}` header is not a valid header value")]
    InvalidHeader {
        /// The header being set
        name: &'static str,
    },
}

impl AuthError {
    pub(crate) fn token_fetch<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self::TokenFetch(Arc::from(err.into()))
    }
}

/// An error encountered while building or sending a signed request
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request could not be signed
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The signed request could not be built
    #[error("unable to build request")]
    Build(#[source] reqwest::Error),
    /// The request could not be sent
    #[error("error sending request")]
    Send(#[source] reqwest::Error),
}
