//! The authentication manager

use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use azmaps_clock::UnixMillis;
use azmaps_tokens::{
    store::ACCESS_TOKEN_KEY, timers::TimerHandle, AccessToken, AccessTokenRef, ClientIdRef,
    TokenStatus, TokenWithExpiry,
};
use once_cell::sync::OnceCell;
use tokio::{
    runtime::Handle,
    sync::{watch, Notify},
};

use crate::{
    identity::{IdentityContext, LoginRequest},
    registry::ManagerContext,
    signing::{
        RequestParameters, BEARER_SCHEME, CLIENT_ID_HEADER, DEFAULT_RESOURCE, MAP_AGENT,
        MAP_AGENT_HEADER, REQUEST_ORIGIN, REQUEST_ORIGIN_HEADER, SAS_SCHEME, SESSION_ID_HEADER,
    },
    AuthError, AuthenticationOptions, AuthenticationType, ConfigurationError, RequestError,
};

/// How often an interactive login is checked for completion
const LOGIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Clone, Debug)]
enum InitState {
    Initializing,
    Ready,
    Failed(AuthError),
}

impl InitState {
    fn is_settled(&self) -> bool {
        !matches!(self, Self::Initializing)
    }
}

#[derive(Clone, Copy, Debug)]
struct ScheduledRenewal {
    handle: TimerHandle,
    due: UnixMillis,
}

struct ManagerInner {
    options: AuthenticationOptions,
    shared: Arc<ManagerContext>,
    initialized: AtomicBool,
    init: OnceCell<watch::Receiver<InitState>>,
    renewal: Mutex<Option<ScheduledRenewal>>,
    fetch_in_flight: AtomicBool,
    fetch_done: Notify,
}

/// Authenticates requests to Azure Maps
///
/// A manager is obtained from a [`ManagerRegistry`](crate::ManagerRegistry),
/// initialized once with [`initialize()`](Self::initialize), and then used to
/// sign every tile request. Clones share the same state.
#[derive(Clone)]
pub struct AuthenticationManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for AuthenticationManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthenticationManager")
            .field("auth_type", &self.inner.options.auth_type)
            .field("az_maps_domain", &self.inner.options.az_maps_domain)
            .field("initialized", &self.is_initialized())
            .field("pending_renewal", &self.pending_renewal())
            .finish_non_exhaustive()
    }
}

impl AuthenticationManager {
    pub(crate) fn new(options: AuthenticationOptions, shared: Arc<ManagerContext>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                options,
                shared,
                initialized: AtomicBool::new(false),
                init: OnceCell::new(),
                renewal: Mutex::new(None),
                fetch_in_flight: AtomicBool::new(false),
                fetch_done: Notify::new(),
            }),
        }
    }

    /// Whether two handles refer to the same manager
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The options this manager was created with
    pub fn options(&self) -> &AuthenticationOptions {
        &self.inner.options
    }

    /// Whether initialization has completed successfully
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// The authentication type in use
    pub fn auth_type(&self) -> AuthenticationType {
        self.inner.options.auth_type
    }

    /// The client ID in use, if any
    pub fn client_id(&self) -> Option<&ClientIdRef> {
        self.inner.options.client_id()
    }

    /// The session ID attached to every signed request
    pub fn session_id(&self) -> &str {
        &self.inner.shared.session_id
    }

    /// When the pending token renewal is due, if one is scheduled
    pub fn pending_renewal(&self) -> Option<UnixMillis> {
        let renewal = *self.renewal();
        renewal
            .filter(|r| self.inner.shared.timers.is_pending(r.handle))
            .map(|r| r.due)
    }

    /// Initializes the configured authentication mechanism
    ///
    /// The first call starts initialization. Every call, concurrent or later,
    /// observes the outcome of that single attempt. A failed initialization is
    /// never retried by this manager.
    ///
    /// When the current page load is itself the target of an interactive login
    /// redirect, initialization never completes.
    #[tracing::instrument(skip(self), fields(auth_type = %self.inner.options.auth_type))]
    pub async fn initialize(&self) -> Result<(), AuthError> {
        let mut rx = self
            .inner
            .init
            .get_or_init(|| self.start_initialization())
            .clone();

        let settled = rx
            .wait_for(InitState::is_settled)
            .await
            .map(|state| (*state).clone());

        match settled {
            Ok(InitState::Failed(error)) => Err(error),
            Ok(_) => Ok(()),
            Err(_) => std::future::pending().await,
        }
    }

    fn start_initialization(&self) -> watch::Receiver<InitState> {
        let (tx, rx) = watch::channel(InitState::Initializing);
        let manager = self.clone();

        tokio::spawn(async move {
            match manager.run_strategy().await {
                Some(Ok(())) => {
                    manager.inner.initialized.store(true, Ordering::Release);
                    tracing::info!("authentication initialized");
                    tx.send_replace(InitState::Ready);
                }
                Some(Err(error)) => {
                    tracing::info!(
                        error = (&error as &dyn Error),
                        "authentication initialization failed"
                    );
                    tx.send_replace(InitState::Failed(error));
                }
                None => {
                    tracing::debug!(
                        "page load is a login redirect target, initialization left pending"
                    );
                }
            }
        });

        rx
    }

    async fn run_strategy(&self) -> Option<Result<(), AuthError>> {
        match self.inner.options.auth_type {
            AuthenticationType::SubscriptionKey => Some(Ok(())),
            AuthenticationType::FederatedIdentity => self.initialize_federated().await,
            AuthenticationType::AnonymousCallback | AuthenticationType::SasCallback => {
                Some(self.initial_token_fetch().await)
            }
        }
    }

    /// Fetches the first token, waiting out any background fetch already running
    async fn initial_token_fetch(&self) -> Result<(), AuthError> {
        loop {
            let finished = self.inner.fetch_done.notified();
            if !self.inner.fetch_in_flight.swap(true, Ordering::AcqRel) {
                break;
            }
            tracing::trace!("waiting for background token fetch to finish");
            finished.await;
        }

        let result = self.fetch_and_store_token().await;
        self.finish_token_fetch();
        result.map(drop)
    }

    async fn initialize_federated(&self) -> Option<Result<(), AuthError>> {
        let identity = match self.identity() {
            Ok(identity) => identity,
            Err(error) => return Some(Err(error.into())),
        };

        identity.handle_window_callback();
        if let Some(error) = identity.login_error() {
            return Some(Err(AuthError::Login(error)));
        }

        let fragment = self
            .inner
            .options
            .location_fragment
            .as_deref()
            .unwrap_or_default();
        if identity.is_callback(fragment) {
            return None;
        }

        // Let callers observe the pending initialization before login starts.
        tokio::task::yield_now().await;

        Some(self.login_and_acquire(identity.as_ref()).await)
    }

    async fn login_and_acquire(&self, identity: &dyn IdentityContext) -> Result<(), AuthError> {
        let app_id = self
            .inner
            .options
            .identity_app_id
            .as_deref()
            .ok_or_else(|| self.missing("identity app ID"))?;

        let signed_in = identity.cached_token(app_id).is_some() && identity.cached_user().is_some();

        if !signed_in {
            if !identity.login_in_progress() {
                tracing::debug!(identity.app_id = app_id, "starting interactive login");
                identity.login(&LoginRequest::new(DEFAULT_RESOURCE));
            }

            let mut poll = tokio::time::interval(LOGIN_POLL_INTERVAL);
            loop {
                poll.tick().await;
                if !identity.login_in_progress() {
                    break;
                }
            }

            if identity.cached_token(app_id).is_none() {
                let message = identity.login_error().unwrap_or_else(|| {
                    format!(
                        "the identity context is not logged in for the app ID {}",
                        app_id
                    )
                });
                return Err(AuthError::Login(message));
            }
        }

        identity
            .acquire_token(DEFAULT_RESOURCE)
            .await
            .map_err(AuthError::token_fetch)?;

        Ok(())
    }

    /// Gets the current token
    ///
    /// For a subscription key, the key itself is returned.
    ///
    /// For the other types, this returns whatever token is currently cached and
    /// never waits for a new one. If no token is cached, a fetch is started in
    /// the background and `None` is returned. A cached token that is due for
    /// renewal, or has already expired, is still returned while a replacement
    /// is fetched in the background.
    pub fn get_token(&self) -> Result<Option<AccessToken>, AuthError> {
        let options = &self.inner.options;
        match options.auth_type {
            AuthenticationType::SubscriptionKey => {
                let key = options
                    .subscription_key
                    .as_ref()
                    .ok_or_else(|| self.missing("subscription key"))?;
                Ok(Some(AccessToken::new(key.as_str().to_owned())))
            }
            AuthenticationType::FederatedIdentity => Ok(self.federated_token()?),
            AuthenticationType::AnonymousCallback | AuthenticationType::SasCallback => {
                self.callback_token()
            }
        }
    }

    fn federated_token(&self) -> Result<Option<AccessToken>, ConfigurationError> {
        let identity = self.identity()?;

        if let Some(token) = identity.cached_token(DEFAULT_RESOURCE) {
            return Ok(Some(token));
        }

        if identity.cached_user().is_none() {
            tracing::debug!("no signed-in user, starting interactive login");
            identity.login(&LoginRequest::new(DEFAULT_RESOURCE));
        }

        match self.runtime() {
            Some(runtime) => {
                runtime.spawn(async move {
                    if let Err(error) = identity.acquire_token(DEFAULT_RESOURCE).await {
                        tracing::warn!(
                            error = (&error as &dyn Error),
                            "unable to acquire identity token, will retry on next use"
                        );
                    }
                });
            }
            None => {
                tracing::warn!("no async runtime available, identity token not acquired");
            }
        }

        Ok(None)
    }

    fn callback_token(&self) -> Result<Option<AccessToken>, AuthError> {
        let stored = match self.inner.shared.store.load(ACCESS_TOKEN_KEY) {
            Some(stored) => stored,
            None => {
                tracing::trace!("no cached token, fetching one");
                self.trigger_token_fetch();
                return Ok(None);
            }
        };

        let token = TokenWithExpiry::decode(AccessToken::new(stored))?;
        let now = self.inner.shared.clock.now();

        match token.token_status_at(now) {
            TokenStatus::Fresh => self.schedule_renewal(&token, now),
            TokenStatus::Stale => {
                tracing::debug!(
                    token.expiry = token.expiry().0,
                    "cached token is due for renewal, refetching in background"
                );
                self.trigger_token_fetch();
            }
            TokenStatus::Expired => {
                tracing::warn!(
                    token.expiry = token.expiry().0,
                    "cached token has expired, serving it while refetching in background"
                );
                self.trigger_token_fetch();
            }
        }

        Ok(Some(token.into_access_token()))
    }

    /// Starts a background token fetch unless one is already running
    fn trigger_token_fetch(&self) {
        if self.inner.fetch_in_flight.swap(true, Ordering::AcqRel) {
            tracing::trace!("token fetch already in flight");
            return;
        }

        match self.runtime() {
            Some(runtime) => {
                let manager = self.clone();
                runtime.spawn(async move {
                    let result = manager.fetch_and_store_token().await;
                    manager.finish_token_fetch();

                    if let Err(error) = result {
                        tracing::warn!(
                            error = (&error as &dyn Error),
                            "background token fetch failed, will retry on next use"
                        );
                    }
                });
            }
            None => {
                self.finish_token_fetch();
                tracing::warn!("no async runtime available, token fetch skipped");
            }
        }
    }

    fn finish_token_fetch(&self) {
        self.inner.fetch_in_flight.store(false, Ordering::Release);
        self.inner.fetch_done.notify_waiters();
    }

    async fn fetch_and_store_token(&self) -> Result<TokenWithExpiry, AuthError> {
        let get_token = self
            .inner
            .options
            .get_token
            .as_ref()
            .ok_or_else(|| self.missing("token callback"))?;

        let access_token = get_token
            .fetch_token()
            .await
            .map_err(AuthError::token_fetch)?;
        let token = TokenWithExpiry::decode(access_token)?;

        if !self
            .inner
            .shared
            .store
            .save(ACCESS_TOKEN_KEY, token.access_token().as_str())
        {
            tracing::warn!("unable to persist access token");
        }

        let now = self.inner.shared.clock.now();
        tracing::info!(
            token.expiry = token.expiry().0,
            token.status = ?token.token_status_at(now),
            "obtained new access token"
        );

        if token.token_status_at(now) == TokenStatus::Fresh {
            self.schedule_renewal(&token, now);
        }

        Ok(token)
    }

    /// Replaces any pending renewal with one due when `token` becomes stale
    fn schedule_renewal(&self, token: &TokenWithExpiry, now: UnixMillis) {
        let due = token.renewal_due();
        let delay = token.until_renewal_at(now);
        let timers = &self.inner.shared.timers;

        let mut renewal = self.renewal();
        if let Some(previous) = renewal.take() {
            timers.cancel(previous.handle);
        }

        let manager = Arc::downgrade(&self.inner);
        let handle = timers.schedule(delay.into(), move || {
            if let Some(inner) = manager.upgrade() {
                tracing::debug!("token renewal due");
                AuthenticationManager { inner }.trigger_token_fetch();
            }
        });

        tracing::debug!(
            renewal.due = due.0,
            renewal.delay_ms = delay.0,
            "scheduled token renewal"
        );
        *renewal = Some(ScheduledRenewal { handle, due });
    }

    /// Signs a request
    ///
    /// Substitutes the maps domain into the URL, attaches the identification
    /// headers, and then attaches credentials as required by the
    /// authentication type. If no token is available yet, the request is
    /// returned without an `Authorization` header.
    pub fn sign_request(
        &self,
        mut request: RequestParameters,
    ) -> Result<RequestParameters, AuthError> {
        let options = &self.inner.options;

        request.substitute_domain(&options.az_maps_domain);
        request.set_header(SESSION_ID_HEADER, self.session_id())?;
        request.set_header(REQUEST_ORIGIN_HEADER, REQUEST_ORIGIN)?;
        request.set_header(MAP_AGENT_HEADER, MAP_AGENT)?;

        match options.auth_type {
            AuthenticationType::FederatedIdentity | AuthenticationType::AnonymousCallback => {
                let token = self.get_token()?;
                self.attach_credentials(&mut request, BEARER_SCHEME, token.as_deref())?;
            }
            AuthenticationType::SasCallback => {
                let token = self.get_token()?;
                self.attach_credentials(&mut request, SAS_SCHEME, token.as_deref())?;
            }
            AuthenticationType::SubscriptionKey => {
                let key = options
                    .subscription_key
                    .as_ref()
                    .ok_or_else(|| self.missing("subscription key"))?;
                request.append_subscription_key(key);
            }
        }

        Ok(request)
    }

    fn attach_credentials(
        &self,
        request: &mut RequestParameters,
        scheme: &str,
        token: Option<&AccessTokenRef>,
    ) -> Result<(), AuthError> {
        let client_id = self.client_id().ok_or_else(|| self.missing("client ID"))?;
        request.set_header(CLIENT_ID_HEADER, client_id.as_str())?;

        match token {
            Some(token) => request.set_authorization(scheme, token)?,
            None => tracing::trace!("no token available yet, request sent without authorization"),
        }

        Ok(())
    }

    /// Builds a signed GET request for `url` without sending it
    pub fn build_request(&self, url: &str) -> Result<reqwest::Request, RequestError> {
        let signed = self.sign_request(RequestParameters::new(url))?;

        self.inner
            .shared
            .http
            .get(signed.url)
            .headers(signed.headers)
            .build()
            .map_err(RequestError::Build)
    }

    /// Sends a signed GET request for `url`
    #[tracing::instrument(skip(self))]
    pub async fn get_request(&self, url: &str) -> Result<reqwest::Response, RequestError> {
        let request = self.build_request(url)?;

        self.inner
            .shared
            .http
            .execute(request)
            .await
            .map_err(RequestError::Send)
    }

    fn identity(&self) -> Result<Arc<dyn IdentityContext>, ConfigurationError> {
        match &self.inner.options.identity_context {
            Some(identity) => Ok(Arc::clone(identity)),
            None => self.inner.shared.default_identity(&self.inner.options),
        }
    }

    /// The runtime background work is spawned onto
    ///
    /// Prefers the caller's runtime, then the one the registry was built in.
    fn runtime(&self) -> Option<Handle> {
        Handle::try_current()
            .ok()
            .or_else(|| self.inner.shared.runtime.clone())
    }

    fn renewal(&self) -> MutexGuard<'_, Option<ScheduledRenewal>> {
        self.inner
            .renewal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn missing(&self, field: &'static str) -> ConfigurationError {
        ConfigurationError::MissingField {
            field,
            auth_type: self.inner.options.auth_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use azmaps_tokens::sources::ConstTokenCallback;
    use reqwest::header;

    use super::*;
    use crate::ManagerRegistry;

    fn manager(options: AuthenticationOptions) -> AuthenticationManager {
        ManagerRegistry::new().get_instance(Some(options)).unwrap()
    }

    mod when_using_a_subscription_key {
        use super::*;

        #[tokio::test]
        async fn initializes_immediately() {
            let manager = manager(AuthenticationOptions::subscription_key("key"));

            manager.initialize().await.unwrap();

            assert!(manager.is_initialized());
        }

        #[test]
        fn token_is_the_key() {
            let manager = manager(AuthenticationOptions::subscription_key("key"));

            let token = manager.get_token().unwrap().unwrap();

            assert_eq!(token.as_str(), "key");
        }

        #[test]
        fn signed_request_carries_identification_headers() {
            let manager = manager(AuthenticationOptions::subscription_key("key"));

            let signed = manager
                .sign_request(RequestParameters::new("https://{azMapsDomain}/map/tile"))
                .unwrap();

            assert_eq!(
                signed.url,
                "https://atlas.microsoft.com/map/tile?subscription-key=key"
            );
            assert_eq!(signed.headers[SESSION_ID_HEADER], manager.session_id());
            assert_eq!(signed.headers[REQUEST_ORIGIN_HEADER], "MapControl");
            assert_eq!(signed.headers[MAP_AGENT_HEADER], MAP_AGENT);
            assert!(signed.headers.get(header::AUTHORIZATION).is_none());
            assert!(signed.headers.get(CLIENT_ID_HEADER).is_none());
        }

        #[test]
        fn built_request_is_a_get() {
            let manager = manager(AuthenticationOptions::subscription_key("key"));

            let request = manager.build_request("https://{azMapsDomain}/a?b=1").unwrap();

            assert_eq!(request.method(), reqwest::Method::GET);
            assert_eq!(
                request.url().as_str(),
                "https://atlas.microsoft.com/a?b=1&subscription-key=key"
            );
        }
    }

    mod when_no_token_has_been_fetched {
        use super::*;

        #[tokio::test]
        async fn signed_request_has_client_id_but_no_authorization() {
            let callback = Arc::new(ConstTokenCallback::new("not-a-jwt"));
            let manager = manager(AuthenticationOptions::anonymous("client", callback));

            let signed = manager
                .sign_request(RequestParameters::new("https://x/y"))
                .unwrap();

            assert_eq!(signed.headers[CLIENT_ID_HEADER], "client");
            assert!(signed.headers.get(header::AUTHORIZATION).is_none());
        }
    }

    mod when_the_token_source_returns_garbage {
        use super::*;

        #[tokio::test]
        async fn initialization_fails_with_invalid_token() {
            let callback = Arc::new(ConstTokenCallback::new("not-a-jwt"));
            let manager = manager(AuthenticationOptions::sas("client", callback));

            let err = manager.initialize().await.unwrap_err();

            assert!(matches!(err, AuthError::InvalidToken(_)));
            assert!(!manager.is_initialized());
        }

        #[tokio::test]
        async fn failure_is_memoized() {
            let callback = Arc::new(ConstTokenCallback::new("not-a-jwt"));
            let manager = manager(AuthenticationOptions::sas("client", callback));

            let first = manager.initialize().await.unwrap_err();
            let second = manager.initialize().await.unwrap_err();

            assert_eq!(first.to_string(), second.to_string());
        }
    }

    mod when_federated_without_an_identity_context {
        use super::*;

        #[tokio::test]
        async fn initialization_fails_with_configuration_error() {
            let manager = manager(AuthenticationOptions::federated_identity(
                "client", "app", "tenant",
            ));

            let err = manager.initialize().await.unwrap_err();

            assert!(matches!(
                err,
                AuthError::Configuration(ConfigurationError::NoIdentityContext)
            ));
        }
    }
}
