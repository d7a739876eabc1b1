//! Wire protocol types shared by both bridge peers.
//!
//! An [`Envelope`] is the only unit exchanged over the raw channel. Its body
//! is classified exactly once at decode time into an explicit tagged union
//! ([`Body`]), so dispatch code matches exhaustively instead of re-testing
//! field presence at every branch.

use serde_json::Value;

/// Diagnostic tunnel: guest console output forwarded to the host (fire-only).
pub const PRINT_CHANNEL: &str = "__bridge_print__";

/// Context-reset signal: the guest context was recreated (fire-only).
pub const RESET_CHANNEL: &str = "__bridge_reset__";

/// Network proxy: the single privileged fetch chokepoint.
pub const FETCH_CHANNEL: &str = "__bridge_fetch__";

/// Returns true for channel names reserved for bridge control traffic.
///
/// `add_handler` and `post_message` refuse these on both peers, so control
/// traffic and user traffic cannot collide.
pub fn is_reserved(name: &str) -> bool {
    matches!(name, PRINT_CHANNEL | RESET_CHANNEL | FETCH_CHANNEL)
}

#[derive(Debug, thiserror::Error)]
#[error("{0:?} is reserved for bridge control traffic")]
pub struct ReservedName(pub String);

/// A send refused before anything was transmitted.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Reserved(#[from] ReservedName),
    #[error(transparent)]
    Serialization(#[from] crate::codec::EncodeError),
}

/// Per-instance authentication token, generated once at bridge construction.
///
/// Known only to the two bridge halves: a v4 UUID, so it is neither guessable
/// nor derivable from anything the guest controls. The value stays
/// crate-internal: `Debug` redacts it, and outside the crate the token is an
/// opaque pairing capability that can be cloned but never read.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretToken(String);

impl SecretToken {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// True when a presented wire secret equals this token.
    pub(crate) fn matches(&self, presented: &str) -> bool {
        self.0 == presented
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken(..)")
    }
}

/// The authenticated unit exchanged over the raw channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub secret: String,
    pub body: Body,
}

impl Envelope {
    pub(crate) fn request(
        secret: &SecretToken,
        name: impl Into<String>,
        id: u64,
        data: Value,
    ) -> Self {
        Self {
            secret: secret.expose().to_string(),
            body: Body::Request {
                name: name.into(),
                id,
                data,
            },
        }
    }

    pub(crate) fn response(secret: &SecretToken, response_id: u64, data: Value) -> Self {
        Self {
            secret: secret.expose().to_string(),
            body: Body::Response { response_id, data },
        }
    }

    pub(crate) fn control(secret: &SecretToken, control: Control) -> Self {
        Self {
            secret: secret.expose().to_string(),
            body: Body::Control(control),
        }
    }
}

/// Envelope body, classified once at decode time.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Named message that expects a response correlated by `id`.
    Request { name: String, id: u64, data: Value },

    /// Reply to a previously sent request.
    Response { response_id: u64, data: Value },

    /// Fire-only control traffic on a reserved channel.
    Control(Control),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// Guest console line tunneled to the host.
    Print { data: Value },

    /// The guest context was torn down and recreated; pending state on both
    /// sides is stale and must be discarded.
    Reset,
}
