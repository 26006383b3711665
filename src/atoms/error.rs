// ── Gateway Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain, one per error kind the lifecycle
//     taxonomy names (NotFound, AlreadyExists, InvalidInput, InvalidState,
//     the three idempotence signals, QrExpired, Busy, Timeout, Transient,
//     Fatal) plus the usual I/O-adjacent `#[from]` conversions.
//   • `code()` returns the machine-readable string the Facade attaches to
//     every reply alongside the human `message` (the `Display` impl).
//   • No variant carries secret material (webhook secrets, API keys) in its
//     message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Session, webhook config, or delivery record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A session with this `name` already exists (I1).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed caller input: empty id, bad e164 phone, invalid proxy config.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation not allowed in the session's current state (e.g. send while
    /// not Connected).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Idempotence signal: `Connect` on an already-Connected session.
    /// The Facade maps this to 200 + informational message, not an error.
    #[error("already connected")]
    AlreadyConnected,

    /// Idempotence signal: `Logout` with no device JID.
    #[error("already logged out")]
    AlreadyLoggedOut,

    /// Idempotence signal: `Disconnect` on an already-disconnected session.
    #[error("already disconnected")]
    AlreadyDisconnected,

    /// Internal trigger for QR regeneration; never escapes the runner.
    #[error("qr code expired")]
    QrExpired,

    /// The runner's command mailbox is full.
    #[error("busy")]
    Busy,

    /// A deadline was exceeded waiting for a reply.
    #[error("timeout")]
    Timeout,

    /// DB or protocol transport hiccup; caller (or the runner's own retry
    /// loop) may retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Unrecoverable inconsistency. The runner that raised this transitions
    /// to `Error` state.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer) — protocol adapter calls and
    /// outbound webhook delivery both surface through here.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// The machine-readable code the Facade attaches alongside `message`
    /// (spec §7: "operations expose both a machine-readable `code` and a
    /// human `message`").
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::AlreadyExists(_) => "ALREADY_EXISTS",
            GatewayError::InvalidInput(_) => "INVALID_INPUT",
            GatewayError::InvalidState(_) => "INVALID_STATE",
            GatewayError::AlreadyConnected => "ALREADY_CONNECTED",
            GatewayError::AlreadyLoggedOut => "ALREADY_LOGGED_OUT",
            GatewayError::AlreadyDisconnected => "ALREADY_DISCONNECTED",
            GatewayError::QrExpired => "QR_EXPIRED",
            GatewayError::Busy => "BUSY",
            GatewayError::Timeout => "TIMEOUT",
            GatewayError::Transient(_) => "TRANSIENT",
            GatewayError::Fatal(_) => "FATAL",
            GatewayError::Io(_) => "IO",
            GatewayError::Serialization(_) => "SERIALIZATION",
            GatewayError::Network(_) => "NETWORK",
            GatewayError::Database(_) => "DATABASE",
            GatewayError::Other(_) => "OTHER",
        }
    }

    /// True for the three connection-idempotence signals the Facade must
    /// map to a 200 response with an informational message instead of an
    /// error (§7 propagation policy).
    pub fn is_idempotence_signal(&self) -> bool {
        matches!(
            self,
            GatewayError::AlreadyConnected
                | GatewayError::AlreadyLoggedOut
                | GatewayError::AlreadyDisconnected
        )
    }

    /// True for errors the runner's own retry loop may recover from locally
    /// (§7: "The SessionRunner recovers locally from `Transient` by
    /// retry-with-backoff").
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_) | GatewayError::Network(_))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

// ── Migration bridge: String → GatewayError ────────────────────────────────

impl From<String> for GatewayError {
    fn from(s: String) -> Self {
        GatewayError::Other(s)
    }
}

impl From<&str> for GatewayError {
    fn from(s: &str) -> Self {
        GatewayError::Other(s.to_string())
    }
}

/// All gateway operations return this type.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_kind() {
        assert_eq!(GatewayError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(GatewayError::Busy.code(), "BUSY");
        assert_eq!(GatewayError::AlreadyConnected.code(), "ALREADY_CONNECTED");
    }

    #[test]
    fn idempotence_signals_are_flagged() {
        assert!(GatewayError::AlreadyConnected.is_idempotence_signal());
        assert!(GatewayError::AlreadyLoggedOut.is_idempotence_signal());
        assert!(GatewayError::AlreadyDisconnected.is_idempotence_signal());
        assert!(!GatewayError::Busy.is_idempotence_signal());
        assert!(!GatewayError::Fatal("x".into()).is_idempotence_signal());
    }

    #[test]
    fn transient_classification() {
        assert!(GatewayError::Transient("db blip".into()).is_transient());
        assert!(!GatewayError::Fatal("corrupt".into()).is_transient());
        assert!(!GatewayError::InvalidInput("bad".into()).is_transient());
    }
}
