//! Sharing of authentication managers between map layers

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use azmaps_clock::{Clock, System};
use azmaps_tokens::{
    store::{KeyValueStorage, MemoryStorage, TokenStore},
    timers::BackgroundTimers,
};
use once_cell::sync::OnceCell;
use tokio::runtime::Handle;

use crate::{
    identity::{IdentityConfig, IdentityContext, IdentityContextFactory},
    AuthenticationManager, AuthenticationOptions, ConfigurationError,
};

/// State shared by every manager handed out by one registry
pub(crate) struct ManagerContext {
    pub(crate) session_id: String,
    pub(crate) store: TokenStore,
    pub(crate) timers: BackgroundTimers,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) http: reqwest::Client,
    pub(crate) runtime: Option<Handle>,
    identity_factory: Option<Arc<dyn IdentityContextFactory>>,
    default_identity: OnceCell<Arc<dyn IdentityContext>>,
}

impl ManagerContext {
    /// The identity context shared by managers that were not given their own
    ///
    /// Created on first use from the options of the manager that first needs it.
    pub(crate) fn default_identity(
        &self,
        options: &AuthenticationOptions,
    ) -> Result<Arc<dyn IdentityContext>, ConfigurationError> {
        self.default_identity
            .get_or_try_init(|| {
                let config = IdentityConfig::from_options(options)?;
                let factory = self
                    .identity_factory
                    .as_ref()
                    .ok_or(ConfigurationError::NoIdentityContext)?;

                tracing::debug!(
                    identity.instance = %config.instance,
                    identity.tenant = %config.tenant,
                    "creating default identity context"
                );
                factory.create(config)
            })
            .map(Arc::clone)
    }
}

impl fmt::Debug for ManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ManagerContext")
            .field("session_id", &self.session_id)
            .field("store", &self.store)
            .field("timers", &self.timers)
            .field("default_identity", &self.default_identity.get())
            .finish_non_exhaustive()
    }
}

/// Hands out authentication managers, reusing one when credentials match
///
/// The registry remembers the first manager it creates. A later request whose
/// options describe the same credentials as that manager gets it back. Any
/// other request gets a new manager, which is not remembered.
///
/// ```
/// use azmaps_auth::{AuthenticationOptions, ManagerRegistry};
///
/// let registry = ManagerRegistry::new();
///
/// let first = registry.get_instance(Some(AuthenticationOptions::subscription_key("key")))?;
/// let again = registry.get_instance(None)?;
///
/// assert!(first.ptr_eq(&again));
/// # Ok::<(), azmaps_auth::ConfigurationError>(())
/// ```
#[derive(Debug)]
pub struct ManagerRegistry {
    shared: Arc<ManagerContext>,
    remembered: Mutex<Option<AuthenticationManager>>,
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerRegistry {
    /// A registry using only the in-memory storage tier and the system clock
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Gets a manager for the given options
    ///
    /// Without options, the remembered manager is returned. If none exists
    /// yet, this fails with [`ConfigurationError::CredentialsNotSpecified`].
    pub fn get_instance(
        &self,
        options: Option<AuthenticationOptions>,
    ) -> Result<AuthenticationManager, ConfigurationError> {
        let mut remembered = self
            .remembered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut options = match options {
            Some(options) => options,
            None => {
                return remembered
                    .clone()
                    .ok_or(ConfigurationError::CredentialsNotSpecified)
            }
        };

        options.normalize();

        if let Some(existing) = remembered
            .as_ref()
            .filter(|m| m.options().same_credentials(&options))
        {
            tracing::trace!(auth_type = %options.auth_type, "reusing authentication manager");
            return Ok(existing.clone());
        }

        options.validate()?;

        let manager = AuthenticationManager::new(options, Arc::clone(&self.shared));
        tracing::debug!(
            auth_type = %manager.auth_type(),
            remembered = remembered.is_none(),
            "created authentication manager"
        );

        if remembered.is_none() {
            *remembered = Some(manager.clone());
        }

        Ok(manager)
    }

    /// The session ID attached to every request signed by this registry's managers
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// The token store shared by this registry's managers
    pub fn store(&self) -> &TokenStore {
        &self.shared.store
    }

    /// The renewal timers shared by this registry's managers
    pub fn timers(&self) -> &BackgroundTimers {
        &self.shared.timers
    }
}

/// A builder for a [`ManagerRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    durable: Option<Arc<dyn KeyValueStorage>>,
    session: Option<Arc<dyn KeyValueStorage>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    identity_factory: Option<Arc<dyn IdentityContextFactory>>,
    http: Option<reqwest::Client>,
    runtime: Option<Handle>,
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("durable", &self.durable)
            .field("session", &self.session)
            .field("identity_factory", &self.identity_factory.is_some())
            .finish_non_exhaustive()
    }
}

impl RegistryBuilder {
    /// Persists tokens to the given storage when it is usable
    pub fn with_durable_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.durable = Some(storage);
        self
    }

    /// Falls back to the given storage when the durable tier is not usable
    pub fn with_session_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.session = Some(storage);
        self
    }

    /// Uses the given clock to judge token freshness
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Creates the default identity context with the given factory
    pub fn with_identity_factory(mut self, factory: Arc<dyn IdentityContextFactory>) -> Self {
        self.identity_factory = Some(factory);
        self
    }

    /// Sends requests through the given client
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Runs background token work on the given runtime
    ///
    /// Without this, the runtime current when [`build()`](Self::build) is
    /// called is used, if there is one. Managers whose tokens are read from
    /// threads outside any runtime need one of the two.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the registry
    pub fn build(self) -> ManagerRegistry {
        let mut store = TokenStore::new(Arc::new(MemoryStorage::new()));
        if let Some(durable) = self.durable {
            store = store.with_durable(durable);
        }
        if let Some(session) = self.session {
            store = store.with_session(session);
        }

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(System),
        };

        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        let timers = match &runtime {
            Some(runtime) => BackgroundTimers::new().with_runtime(runtime.clone()),
            None => BackgroundTimers::new(),
        };

        let shared = ManagerContext {
            session_id: uuid::Uuid::new_v4().to_string(),
            store,
            timers,
            clock,
            http: self.http.unwrap_or_default(),
            runtime,
            identity_factory: self.identity_factory,
            default_identity: OnceCell::new(),
        };

        ManagerRegistry {
            shared: Arc::new(shared),
            remembered: Mutex::new(None),
        }
    }
}
