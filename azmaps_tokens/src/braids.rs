use aliri_braid::braid;
use std::fmt;

/// Implements `Debug` and `Display` for a secret that print only what kind of
/// secret it is
///
/// The alternate `Debug` form (`{:#?}`) shows the first few characters, enough
/// to tell two secrets apart in a log without revealing either.
macro_rules! redacted_secret {
    ($ty:ty, $kind:literal, shown = $shown:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    let prefix = Prefix {
                        secret: &self.0,
                        chars: $shown,
                    };
                    write!(f, "\"{}\"", prefix)
                } else {
                    f.write_str(concat!("<redacted ", $kind, ">"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("<redacted ", $kind, ">"))
            }
        }
    };
}

/// The first `chars` characters of a secret, followed by an ellipsis if cut short
struct Prefix<'a> {
    secret: &'a str,
    chars: usize,
}

impl fmt::Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.secret.char_indices().nth(self.chars) {
            Some((end, _)) => write!(f, "{}…", &self.secret[..end]),
            None => f.write_str(self.secret),
        }
    }
}

/// An Azure Maps account client ID
///
/// Sent with every signed request in the `x-ms-client-id` header.
#[braid(serde)]
pub struct ClientId;

/// An Azure Maps subscription key
#[braid(serde, debug = "owned", display = "owned")]
pub struct SubscriptionKey;

redacted_secret!(SubscriptionKeyRef, "subscription key", shown = 4);

/// An access token, either a bearer JWT or a SAS token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted_secret!(AccessTokenRef, "access token", shown = 12);
