//! Authentication for Azure Maps tile requests
//!
//! An [`AuthenticationManager`] selects one of four authentication mechanisms,
//! performs the initial sign-in or token acquisition, keeps tokens fresh in
//! the background, and signs every outgoing tile request:
//!
//! * [`AuthenticationType::SubscriptionKey`]: a static key appended to the
//!   query string.
//! * [`AuthenticationType::FederatedIdentity`]: a bearer token obtained from an
//!   interactive [`IdentityContext`](identity::IdentityContext).
//! * [`AuthenticationType::AnonymousCallback`]: a bearer token fetched through a
//!   caller-supplied [`TokenCallback`](azmaps_tokens::sources::TokenCallback).
//! * [`AuthenticationType::SasCallback`]: a SAS token fetched the same way and
//!   sent with the `jwt-sas` scheme.
//!
//! Managers are handed out by a [`ManagerRegistry`], which reuses a manager
//! whenever a map layer asks for one with the same credentials.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use azmaps_auth::{AuthenticationOptions, ManagerRegistry};
//! use azmaps_tokens::{
//!     sources::{BoxError, FnTokenCallback},
//!     AccessToken,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ManagerRegistry::new();
//!
//! let get_token = FnTokenCallback::new(|| async {
//!     // Fetch a token from an endpoint owned by the application
//!     Ok::<_, BoxError>(AccessToken::from_static("eyJ0eXAiOiJKV1QifQ.eyJleHAiOjQxMDI0NDQ4MDB9.c2ln"))
//! });
//!
//! let manager = registry.get_instance(Some(AuthenticationOptions::anonymous(
//!     "my-client-id",
//!     Arc::new(get_token),
//! )))?;
//!
//! manager.initialize().await?;
//!
//! let tile = manager
//!     .get_request("https://{azMapsDomain}/map/tile?api-version=2.1&tilesetId=microsoft.base.road&zoom=1&x=0&y=0")
//!     .await?;
//! # drop(tile);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod error;
pub mod identity;
mod manager;
mod options;
mod registry;
pub mod signing;

pub use error::{AuthError, ConfigurationError, RequestError};
pub use manager::AuthenticationManager;
pub use options::{AuthenticationOptions, AuthenticationType, DEFAULT_MAPS_DOMAIN};
pub use registry::{ManagerRegistry, RegistryBuilder};
pub use signing::RequestParameters;
