//! The contract consumed from an interactive identity provider

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use azmaps_tokens::AccessToken;
use thiserror::Error;

use crate::{AuthenticationOptions, AuthenticationType, ConfigurationError};

/// The identity provider instance signed in against when none is configured
pub const DEFAULT_IDENTITY_INSTANCE: &str = "https://login.microsoftonline.com/";

/// Where the default identity context caches its tokens
pub const PREFERRED_CACHE_LOCATION: &str = "localStorage";

/// A signed-in user as reported by an identity context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityUser {
    /// The user's sign-in name
    pub user_name: String,
}

/// An identity context failed to acquire a token
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct IdentityError {
    message: String,
}

impl IdentityError {
    /// Constructs an error with the message reported by the identity provider
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message reported by the identity provider
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Parameters for a single interactive login round trip
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginRequest {
    /// The resource the login is for
    pub resource: String,
    /// An opaque value echoed back by the identity provider on redirect
    pub state: String,
}

impl LoginRequest {
    /// A login request for `resource` with a fresh random state value
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            state: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// An interactive identity provider session
///
/// The login and redirect mechanics are owned entirely by the implementation.
/// The authentication manager only drives it through this interface.
#[async_trait]
pub trait IdentityContext: Send + Sync + fmt::Debug {
    /// Starts an interactive login
    fn login(&self, request: &LoginRequest);

    /// Whether an interactive login is currently underway
    fn login_in_progress(&self) -> bool;

    /// A cached token for the given resource, if one is available
    fn cached_token(&self, resource: &str) -> Option<AccessToken>;

    /// The signed-in user, if any
    fn cached_user(&self) -> Option<IdentityUser>;

    /// The error recorded by the most recent login attempt, if any
    fn login_error(&self) -> Option<String>;

    /// Acquires a token for the given resource, silently if possible
    async fn acquire_token(&self, resource: &str) -> Result<AccessToken, IdentityError>;

    /// Processes the response of a pending interactive login redirect, if any
    fn handle_window_callback(&self);

    /// Whether the given URL fragment is an identity provider redirect response
    fn is_callback(&self, fragment: &str) -> bool;
}

/// Settings used to construct the shared default identity context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityConfig {
    /// The identity provider instance
    pub instance: String,
    /// The tenant owning the app registration
    pub tenant: String,
    /// The app ID registered with the identity provider
    pub app_id: String,
    /// Where the identity context should cache its tokens
    pub cache_location: String,
}

impl IdentityConfig {
    /// Extracts the identity settings from authentication options
    ///
    /// Both the app ID and the tenant are required.
    pub fn from_options(options: &AuthenticationOptions) -> Result<Self, ConfigurationError> {
        let missing = |field| ConfigurationError::MissingField {
            field,
            auth_type: AuthenticationType::FederatedIdentity,
        };

        let app_id = options
            .identity_app_id
            .clone()
            .ok_or_else(|| missing("identity app ID"))?;
        let tenant = options
            .identity_tenant
            .clone()
            .ok_or_else(|| missing("identity tenant"))?;

        Ok(Self {
            instance: options
                .identity_instance
                .clone()
                .unwrap_or_else(|| DEFAULT_IDENTITY_INSTANCE.to_owned()),
            tenant,
            app_id,
            cache_location: PREFERRED_CACHE_LOCATION.to_owned(),
        })
    }
}

/// Constructs the identity context shared by managers that were not given one
pub trait IdentityContextFactory: Send + Sync {
    /// Creates an identity context for the given settings
    fn create(
        &self,
        config: IdentityConfig,
    ) -> Result<Arc<dyn IdentityContext>, ConfigurationError>;
}

impl<F> IdentityContextFactory for F
where
    F: Fn(IdentityConfig) -> Arc<dyn IdentityContext> + Send + Sync,
{
    fn create(
        &self,
        config: IdentityConfig,
    ) -> Result<Arc<dyn IdentityContext>, ConfigurationError> {
        Ok((self)(config))
    }
}
