use std::sync::Arc;

use azmaps_clock::{DurationMillis, UnixMillis};
use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine,
};
use serde::Deserialize;
use thiserror::Error;

use super::{AccessToken, AccessTokenRef};

/// How long before a token's expiry it should be renewed
///
/// Tokens are treated as due for renewal five minutes ahead of their actual
/// expiry so that an in-flight request never carries a token that lapses on
/// the wire.
pub const RENEWAL_SKEW: DurationMillis = DurationMillis::from_secs(300);

/// An error encountered while decoding the expiry of a token
#[derive(Clone, Debug, Error)]
pub enum TokenDecodeError {
    /// The token does not have a `.`-delimited payload segment
    #[error("token does not contain a payload segment")]
    Malformed,
    /// The payload segment is not valid base64
    #[error("token payload is not valid base64")]
    Base64(#[from] base64::DecodeError),
    /// The payload does not contain a numeric `exp` claim
    #[error("token payload does not contain a valid `exp` claim")]
    Claims(#[source] Arc<serde_json::Error>),
}

impl From<serde_json::Error> for TokenDecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Claims(Arc::new(err))
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: f64,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and not yet due for renewal
    Fresh,
    /// The token is valid, but within the renewal window
    Stale,
    /// The token is no longer valid
    Expired,
}

/// An access token along with its decoded expiry
#[derive(Clone, Debug)]
pub struct TokenWithExpiry {
    access_token: AccessToken,
    expiry: UnixMillis,
}

impl TokenWithExpiry {
    /// Decodes the expiry of a token
    ///
    /// The second `.`-delimited segment of the token must be a base64 encoded
    /// JSON object carrying an `exp` claim, the Unix time in seconds at which the
    /// token expires. Both the URL-safe and the standard base64 alphabets are
    /// accepted, with or without padding.
    pub fn decode(access_token: AccessToken) -> Result<Self, TokenDecodeError> {
        let expiry = decode_expiry(access_token.as_str())?;
        Ok(Self {
            access_token,
            expiry,
        })
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Takes ownership of the access token
    #[inline]
    pub fn into_access_token(self) -> AccessToken {
        self.access_token
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixMillis {
        self.expiry
    }

    /// Gets the time from which the token should be renewed
    #[inline]
    pub fn renewal_due(&self) -> UnixMillis {
        self.expiry - RENEWAL_SKEW
    }

    /// Gets the token's lifecycle status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixMillis) -> TokenStatus {
        if time < self.renewal_due() {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the token would be fresh as of the
    /// provided time
    #[inline]
    pub fn until_renewal_at(&self, time: UnixMillis) -> DurationMillis {
        self.renewal_due() - time
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixMillis) -> DurationMillis {
        self.expiry - time
    }
}

fn decode_expiry(token: &str) -> Result<UnixMillis, TokenDecodeError> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|p| !p.is_empty())
        .ok_or(TokenDecodeError::Malformed)?;

    let trimmed = payload.trim_end_matches('=');
    let raw = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))?;

    let claim: ExpiryClaim = serde_json::from_slice(&raw)?;
    if !claim.exp.is_finite() || claim.exp < 0. {
        return Err(TokenDecodeError::Malformed);
    }

    Ok(UnixMillis((claim.exp * 1000.) as u64))
}
