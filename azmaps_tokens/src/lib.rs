//! Building blocks for keeping Azure Maps access tokens fresh
//!
//! Tile requests are signed with whatever token is on hand at the moment the
//! request is made, so the work of keeping that token fresh has to happen ahead
//! of time and in the background. This crate provides the pieces that work is
//! built from:
//!
//! * [`TokenWithExpiry`] decodes the `exp` claim of a JWT-shaped token and
//!   classifies it as fresh, due for renewal, or expired, using a fixed
//!   five-minute [renewal skew][RENEWAL_SKEW].
//! * [`store::TokenStore`] persists the current token across a durable tier,
//!   a session tier, and an in-memory fallback, probing each tier before use.
//! * [`timers::BackgroundTimers`] schedules cancellable renewal callbacks on
//!   dedicated threads that keep counting against the wall clock even when the
//!   async runtime is starved.
//! * [`sources::TokenCallback`] is the contract for caller-supplied token
//!   sources.
//!
//! ```
//! use azmaps_clock::{DurationMillis, UnixMillis};
//! use azmaps_tokens::{AccessToken, TokenStatus, TokenWithExpiry};
//!
//! // {"exp":1700000400}
//! let token = AccessToken::from_static("e30.eyJleHAiOjE3MDAwMDA0MDB9.c2ln");
//! let token = TokenWithExpiry::decode(token)?;
//!
//! let now = UnixMillis::from_secs(1_700_000_000);
//! assert_eq!(token.token_status_at(now), TokenStatus::Fresh);
//! assert_eq!(token.until_renewal_at(now), DurationMillis(100_000));
//! # Ok::<(), azmaps_tokens::TokenDecodeError>(())
//! ```
//!
//! # Features
//!
//! * `file` (default): Provides [`store::FileStorage`], a durable storage tier
//!   backed by a local file.

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

mod braids;
pub mod sources;
pub mod store;
pub mod timers;
mod tokens;

pub use braids::*;
pub use tokens::{TokenDecodeError, TokenStatus, TokenWithExpiry, RENEWAL_SKEW};
