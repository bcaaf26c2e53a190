mod common;

use std::{sync::Arc, time::Duration};

use azmaps_auth::{
    identity::{IdentityConfig, IdentityContext, DEFAULT_IDENTITY_INSTANCE},
    signing::DEFAULT_RESOURCE,
    AuthError, AuthenticationOptions, ConfigurationError, ManagerRegistry, RequestParameters,
};
use common::{FakeIdentity, LoginOutcome};
use reqwest::header;

const APP_ID: &str = "00000000-0000-0000-0000-00000000a99";

fn options(identity: Arc<FakeIdentity>) -> AuthenticationOptions {
    AuthenticationOptions::federated_identity("client", APP_ID, "contoso.example")
        .with_identity_context(identity)
}

mod when_no_user_is_signed_in {
    use super::*;

    #[tokio::test]
    async fn initialization_logs_in_and_acquires_a_token() {
        let identity = FakeIdentity::new(APP_ID, LoginOutcome::SignIn);
        let manager = ManagerRegistry::new()
            .get_instance(Some(options(identity.clone())))
            .unwrap();

        manager.initialize().await.unwrap();

        assert!(manager.is_initialized());
        assert_eq!(identity.window_callbacks(), 1);
        assert_eq!(identity.logins(), 1);
        assert_eq!(identity.acquisitions(), 1);
        assert_eq!(identity.login_requests()[0].resource, DEFAULT_RESOURCE);
    }

    #[tokio::test]
    async fn failed_login_rejects_with_the_recorded_error() {
        let identity = FakeIdentity::new(APP_ID, LoginOutcome::Fail("user cancelled".to_owned()));
        let manager = ManagerRegistry::new()
            .get_instance(Some(options(identity.clone())))
            .unwrap();

        let err = manager.initialize().await.unwrap_err();

        assert!(matches!(&err, AuthError::Login(message) if message == "user cancelled"));
        assert_eq!(identity.acquisitions(), 0);
    }

    #[tokio::test]
    async fn get_token_starts_a_login() {
        let identity = FakeIdentity::new(APP_ID, LoginOutcome::SignIn);
        let manager = ManagerRegistry::new()
            .get_instance(Some(options(identity.clone())))
            .unwrap();

        let token = manager.get_token().unwrap();

        assert!(token.is_none());
        assert_eq!(identity.logins(), 1);
    }
}

mod when_a_user_is_already_signed_in {
    use super::*;

    #[tokio::test]
    async fn initialization_acquires_without_logging_in() {
        let identity = FakeIdentity::signed_in(APP_ID);
        let manager = ManagerRegistry::new()
            .get_instance(Some(options(identity.clone())))
            .unwrap();

        manager.initialize().await.unwrap();

        assert_eq!(identity.logins(), 0);
        assert_eq!(identity.acquisitions(), 1);
    }

    #[tokio::test]
    async fn requests_carry_the_cached_bearer_token() {
        let identity = FakeIdentity::signed_in(APP_ID);
        let manager = ManagerRegistry::new()
            .get_instance(Some(options(identity.clone())))
            .unwrap();
        manager.initialize().await.unwrap();
        let token = identity.cached_token(DEFAULT_RESOURCE).unwrap();

        let signed = manager
            .sign_request(RequestParameters::new("https://{azMapsDomain}/map/tile"))
            .unwrap();

        assert_eq!(signed.headers["x-ms-client-id"], "client");
        assert_eq!(
            signed.headers[header::AUTHORIZATION],
            format!("Bearer {}", token.as_str())
        );
    }
}

mod when_a_login_error_was_recorded {
    use super::*;

    #[tokio::test]
    async fn initialization_fails_permanently() {
        let identity = FakeIdentity::with_login_error(APP_ID, "AADSTS50105");
        let manager = ManagerRegistry::new()
            .get_instance(Some(options(identity.clone())))
            .unwrap();

        let first = manager.initialize().await.unwrap_err();
        let second = manager.initialize().await.unwrap_err();

        assert!(matches!(&first, AuthError::Login(message) if message == "AADSTS50105"));
        assert!(matches!(&second, AuthError::Login(message) if message == "AADSTS50105"));
        assert_eq!(identity.window_callbacks(), 1);
        assert_eq!(identity.logins(), 0);
        assert!(!manager.is_initialized());
    }
}

mod when_the_page_is_a_login_redirect_target {
    use super::*;

    #[tokio::test]
    async fn initialization_stays_pending() {
        let identity = FakeIdentity::new(APP_ID, LoginOutcome::SignIn);
        let manager = ManagerRegistry::new()
            .get_instance(Some(
                options(identity.clone()).with_location_fragment("#id_token=abc&state=xyz"),
            ))
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(200), manager.initialize()).await;

        assert!(outcome.is_err());
        assert!(!manager.is_initialized());
        assert_eq!(identity.logins(), 0);
    }
}

mod when_no_identity_context_is_supplied {
    use super::*;

    #[tokio::test]
    async fn the_default_context_is_created_once_from_the_factory() {
        let created = Arc::new(std::sync::Mutex::new(Vec::<IdentityConfig>::new()));
        let record = created.clone();
        let registry = ManagerRegistry::builder()
            .with_identity_factory(Arc::new(move |config: IdentityConfig| {
                record.lock().unwrap().push(config);
                FakeIdentity::signed_in(APP_ID) as Arc<dyn IdentityContext>
            }))
            .build();

        let a = registry
            .get_instance(Some(AuthenticationOptions::federated_identity(
                "client",
                APP_ID,
                "contoso.example",
            )))
            .unwrap();
        let b = registry
            .get_instance(Some(AuthenticationOptions::federated_identity(
                "other-client",
                APP_ID,
                "contoso.example",
            )))
            .unwrap();

        a.initialize().await.unwrap();
        b.initialize().await.unwrap();

        let created = created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].instance, DEFAULT_IDENTITY_INSTANCE);
        assert_eq!(created[0].tenant, "contoso.example");
        assert_eq!(created[0].app_id, APP_ID);
    }

    #[tokio::test]
    async fn a_missing_tenant_fails_initialization() {
        let registry = ManagerRegistry::builder()
            .with_identity_factory(Arc::new(|_: IdentityConfig| {
                FakeIdentity::signed_in(APP_ID) as Arc<dyn IdentityContext>
            }))
            .build();
        let mut options = AuthenticationOptions::federated_identity("client", APP_ID, "tenant");
        options.identity_tenant = None;
        let manager = registry.get_instance(Some(options)).unwrap();

        let err = manager.initialize().await.unwrap_err();

        assert!(matches!(
            err,
            AuthError::Configuration(ConfigurationError::MissingField {
                field: "identity tenant",
                ..
            })
        ));
    }
}
