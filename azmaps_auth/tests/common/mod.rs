#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use azmaps_auth::{
    identity::{IdentityContext, IdentityError, IdentityUser, LoginRequest},
    signing::DEFAULT_RESOURCE,
};
use azmaps_clock::{Clock, System};
use azmaps_tokens::{
    sources::{BoxError, TokenCallback},
    AccessToken,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

/// Builds an unsigned JWT-shaped token expiring at the given Unix time
pub fn token_with_exp(exp_secs: u64) -> AccessToken {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp_secs));
    AccessToken::new(format!("{}.{}.c2ln", header, payload))
}

/// Builds a token expiring the given number of seconds from now
pub fn token_expiring_in(secs: i64) -> AccessToken {
    let now = System.now().as_secs() as i64;
    token_with_exp((now + secs).max(0) as u64)
}

/// A token callback that counts its invocations
pub struct CountingCallback {
    calls: AtomicUsize,
    delay: Duration,
    respond: Box<dyn Fn(usize) -> Result<AccessToken, BoxError> + Send + Sync>,
}

impl CountingCallback {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(usize) -> Result<AccessToken, BoxError> + Send + Sync + 'static,
    {
        Self::with_delay(Duration::ZERO, respond)
    }

    pub fn with_delay<F>(delay: Duration, respond: F) -> Arc<Self>
    where
        F: Fn(usize) -> Result<AccessToken, BoxError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            respond: Box::new(respond),
        })
    }

    /// A callback that always hands out a token expiring `secs` from the time of the call
    pub fn expiring_in(secs: i64) -> Arc<Self> {
        Self::new(move |_| Ok(token_expiring_in(secs)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenCallback for CountingCallback {
    async fn fetch_token(&self) -> Result<AccessToken, BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(call)
    }
}

/// How an interactive login started on a [`FakeIdentity`] ends
#[derive(Clone, Debug)]
pub enum LoginOutcome {
    SignIn,
    Fail(String),
}

#[derive(Debug)]
struct FakeState {
    app_id: String,
    tokens: HashMap<String, AccessToken>,
    user: Option<IdentityUser>,
    login_error: Option<String>,
    login_in_progress: bool,
    polls_until_done: usize,
    outcome: LoginOutcome,
    login_requests: Vec<LoginRequest>,
}

/// A scripted identity context
///
/// A login started on this context stays in progress for a few checks of
/// `login_in_progress`, then completes with the configured outcome.
#[derive(Debug)]
pub struct FakeIdentity {
    state: Mutex<FakeState>,
    acquisitions: AtomicUsize,
    window_callbacks: AtomicUsize,
}

impl FakeIdentity {
    pub fn new(app_id: &str, outcome: LoginOutcome) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                app_id: app_id.to_owned(),
                tokens: HashMap::new(),
                user: None,
                login_error: None,
                login_in_progress: false,
                polls_until_done: 0,
                outcome,
                login_requests: Vec::new(),
            }),
            acquisitions: AtomicUsize::new(0),
            window_callbacks: AtomicUsize::new(0),
        })
    }

    /// A context that already has a signed-in user and cached tokens
    pub fn signed_in(app_id: &str) -> Arc<Self> {
        let identity = Self::new(app_id, LoginOutcome::SignIn);
        identity.state().sign_in();
        identity
    }

    /// A context that recorded an error while processing a login redirect
    pub fn with_login_error(app_id: &str, error: &str) -> Arc<Self> {
        let identity = Self::new(app_id, LoginOutcome::SignIn);
        identity.state().login_error = Some(error.to_owned());
        identity
    }

    pub fn logins(&self) -> usize {
        self.state().login_requests.len()
    }

    pub fn login_requests(&self) -> Vec<LoginRequest> {
        self.state().login_requests.clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn window_callbacks(&self) -> usize {
        self.window_callbacks.load(Ordering::SeqCst)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

impl FakeState {
    fn sign_in(&mut self) {
        let app_id = self.app_id.clone();
        self.tokens.insert(app_id, token_expiring_in(3600));
        self.tokens
            .insert(DEFAULT_RESOURCE.to_owned(), token_expiring_in(3600));
        self.user = Some(IdentityUser {
            user_name: "user@example.com".to_owned(),
        });
    }
}

#[async_trait]
impl IdentityContext for FakeIdentity {
    fn login(&self, request: &LoginRequest) {
        let mut state = self.state();
        state.login_requests.push(request.clone());
        state.login_in_progress = true;
        state.polls_until_done = 3;
    }

    fn login_in_progress(&self) -> bool {
        let mut state = self.state();
        if !state.login_in_progress {
            return false;
        }

        if state.polls_until_done > 0 {
            state.polls_until_done -= 1;
            return true;
        }

        state.login_in_progress = false;
        match state.outcome.clone() {
            LoginOutcome::SignIn => state.sign_in(),
            LoginOutcome::Fail(error) => state.login_error = Some(error),
        }
        false
    }

    fn cached_token(&self, resource: &str) -> Option<AccessToken> {
        self.state().tokens.get(resource).cloned()
    }

    fn cached_user(&self) -> Option<IdentityUser> {
        self.state().user.clone()
    }

    fn login_error(&self) -> Option<String> {
        self.state().login_error.clone()
    }

    async fn acquire_token(&self, resource: &str) -> Result<AccessToken, IdentityError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.cached_token(resource)
            .ok_or_else(|| IdentityError::new(format!("no token cached for {}", resource)))
    }

    fn handle_window_callback(&self) {
        self.window_callbacks.fetch_add(1, Ordering::SeqCst);
    }

    fn is_callback(&self, fragment: &str) -> bool {
        fragment.contains("id_token=") || fragment.contains("error=")
    }
}
