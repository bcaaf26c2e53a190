//! Authentication configuration

use std::{fmt, str::FromStr, sync::Arc};

use azmaps_tokens::{sources::TokenCallback, ClientId, ClientIdRef, SubscriptionKey};
use serde::{Deserialize, Serialize};

use crate::{identity::IdentityContext, ConfigurationError};

/// The Azure Maps host used when no domain is configured
pub const DEFAULT_MAPS_DOMAIN: &str = "atlas.microsoft.com";

/// The authentication mechanism used to sign requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthenticationType {
    /// A static subscription key, sent as a query parameter
    SubscriptionKey,
    /// A bearer token issued to an interactively signed-in user by a federated
    /// identity provider
    #[serde(alias = "aad")]
    FederatedIdentity,
    /// A bearer token fetched on demand through a caller-supplied callback
    #[serde(alias = "anonymous")]
    AnonymousCallback,
    /// A SAS token fetched on demand through a caller-supplied callback
    #[serde(alias = "sas")]
    SasCallback,
}

impl AuthenticationType {
    /// The configuration name of this authentication type
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubscriptionKey => "subscriptionKey",
            Self::FederatedIdentity => "federatedIdentity",
            Self::AnonymousCallback => "anonymousCallback",
            Self::SasCallback => "sasCallback",
        }
    }
}

impl fmt::Display for AuthenticationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthenticationType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscriptionKey" => Ok(Self::SubscriptionKey),
            "federatedIdentity" | "aad" => Ok(Self::FederatedIdentity),
            "anonymousCallback" | "anonymous" => Ok(Self::AnonymousCallback),
            "sasCallback" | "sas" => Ok(Self::SasCallback),
            other => Err(ConfigurationError::InvalidAuthType(other.to_owned())),
        }
    }
}

fn default_domain() -> String {
    DEFAULT_MAPS_DOMAIN.to_owned()
}

/// Options for specifying how requests to Azure Maps are authenticated
///
/// The plain-data fields can be deserialized from a camelCase configuration
/// object. The token callback, identity context, and page location can only be
/// set programmatically.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    /// The Azure Maps host substituted into request URLs
    #[serde(default = "default_domain")]
    pub az_maps_domain: String,

    /// The authentication mechanism to use
    pub auth_type: AuthenticationType,

    /// Subscription key for the Azure Maps account
    ///
    /// Required for [`AuthenticationType::SubscriptionKey`].
    #[serde(default)]
    pub subscription_key: Option<SubscriptionKey>,

    /// The Azure Maps account client ID
    ///
    /// Required for every type other than [`AuthenticationType::SubscriptionKey`].
    #[serde(default)]
    pub client_id: Option<ClientId>,

    /// The app ID registered with the identity provider
    #[serde(default)]
    pub identity_app_id: Option<String>,

    /// The identity provider tenant owning `identity_app_id`
    #[serde(default)]
    pub identity_tenant: Option<String>,

    /// The identity provider instance to sign in against
    #[serde(default)]
    pub identity_instance: Option<String>,

    /// The token source for the callback-based types
    ///
    /// Compared by identity when deciding whether two option sets describe
    /// the same credentials.
    #[serde(skip)]
    pub get_token: Option<Arc<dyn TokenCallback>>,

    /// An identity context to use instead of the shared default one
    #[serde(skip)]
    pub identity_context: Option<Arc<dyn IdentityContext>>,

    /// The URL fragment of the current page load
    ///
    /// Used to detect that the current page is the target of an interactive
    /// login redirect.
    #[serde(skip)]
    pub location_fragment: Option<String>,
}

impl AuthenticationOptions {
    fn with_type(auth_type: AuthenticationType) -> Self {
        Self {
            az_maps_domain: default_domain(),
            auth_type,
            subscription_key: None,
            client_id: None,
            identity_app_id: None,
            identity_tenant: None,
            identity_instance: None,
            get_token: None,
            identity_context: None,
            location_fragment: None,
        }
    }

    /// Options for subscription key authentication
    pub fn subscription_key(key: impl Into<SubscriptionKey>) -> Self {
        Self {
            subscription_key: Some(key.into()),
            ..Self::with_type(AuthenticationType::SubscriptionKey)
        }
    }

    /// Options for federated identity authentication
    pub fn federated_identity(
        client_id: impl Into<ClientId>,
        app_id: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            client_id: Some(client_id.into()),
            identity_app_id: Some(app_id.into()),
            identity_tenant: Some(tenant.into()),
            ..Self::with_type(AuthenticationType::FederatedIdentity)
        }
    }

    /// Options for anonymous authentication with a bearer token callback
    pub fn anonymous(client_id: impl Into<ClientId>, get_token: Arc<dyn TokenCallback>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            get_token: Some(get_token),
            ..Self::with_type(AuthenticationType::AnonymousCallback)
        }
    }

    /// Options for SAS token authentication with a token callback
    pub fn sas(client_id: impl Into<ClientId>, get_token: Arc<dyn TokenCallback>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            get_token: Some(get_token),
            ..Self::with_type(AuthenticationType::SasCallback)
        }
    }

    /// Sets the Azure Maps host
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.az_maps_domain = domain.into();
        self
    }

    /// Sets the identity provider instance
    pub fn with_identity_instance(mut self, instance: impl Into<String>) -> Self {
        self.identity_instance = Some(instance.into());
        self
    }

    /// Uses the given identity context instead of the shared default
    pub fn with_identity_context(mut self, context: Arc<dyn IdentityContext>) -> Self {
        self.identity_context = Some(context);
        self
    }

    /// Records the URL fragment of the current page load
    pub fn with_location_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.location_fragment = Some(fragment.into());
        self
    }

    /// The configured client ID, if any
    pub fn client_id(&self) -> Option<&ClientIdRef> {
        self.client_id.as_deref()
    }

    /// Strips any `scheme://` prefix from the domain and fills in the default
    /// domain if none was given
    pub(crate) fn normalize(&mut self) {
        let domain = self.az_maps_domain.trim();
        let domain = match domain.split_once("://") {
            Some((scheme, rest))
                if !scheme.is_empty()
                    && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                rest
            }
            _ => domain,
        };

        self.az_maps_domain = if domain.is_empty() {
            default_domain()
        } else {
            domain.to_owned()
        };
    }

    /// Whether two option sets describe the same credentials
    ///
    /// All plain-data credential fields are compared by value. The token
    /// callback is compared by identity, so two separately constructed but
    /// otherwise identical callbacks are different credentials.
    pub fn same_credentials(&self, other: &Self) -> bool {
        let same_callback = match (&self.get_token, &other.get_token) {
            (Some(a), Some(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (None, None) => true,
            _ => false,
        };

        same_callback
            && self.az_maps_domain == other.az_maps_domain
            && self.client_id == other.client_id
            && self.auth_type == other.auth_type
            && self.identity_app_id == other.identity_app_id
            && self.identity_tenant == other.identity_tenant
            && self.identity_instance == other.identity_instance
            && self.subscription_key == other.subscription_key
    }

    /// Checks that the fields required by the chosen type are present
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let missing = |field| ConfigurationError::MissingField {
            field,
            auth_type: self.auth_type,
        };

        match self.auth_type {
            AuthenticationType::SubscriptionKey => {
                self.subscription_key
                    .as_ref()
                    .ok_or_else(|| missing("subscription key"))?;
            }
            AuthenticationType::FederatedIdentity => {
                self.client_id.as_ref().ok_or_else(|| missing("client ID"))?;
                self.identity_app_id
                    .as_ref()
                    .ok_or_else(|| missing("identity app ID"))?;
            }
            AuthenticationType::AnonymousCallback | AuthenticationType::SasCallback => {
                self.client_id.as_ref().ok_or_else(|| missing("client ID"))?;
                self.get_token
                    .as_ref()
                    .ok_or_else(|| missing("token callback"))?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for AuthenticationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationOptions")
            .field("az_maps_domain", &self.az_maps_domain)
            .field("auth_type", &self.auth_type)
            .field("subscription_key", &self.subscription_key)
            .field("client_id", &self.client_id)
            .field("identity_app_id", &self.identity_app_id)
            .field("identity_tenant", &self.identity_tenant)
            .field("identity_instance", &self.identity_instance)
            .field("get_token", &self.get_token.as_ref().map(|_| "<callback>"))
            .field("identity_context", &self.identity_context)
            .field("location_fragment", &self.location_fragment)
            .finish()
    }
}
