use thiserror::Error;

/// Error taxonomy shared by every component. Each variant corresponds to one
/// of the failure classes a caller needs to react to differently: config and
/// persistence errors are fatal at startup, broker errors are fatal inside
/// the registrar but recoverable inside a player session, generator errors
/// are logged and retried, protocol errors just drop a message, and user
/// errors are shown to the player rather than logged.
#[derive(Debug, Error)]
pub enum TypeRaceError {
    #[error("config error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("generator error: {0}")]
    Generator(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("user error: {0}")]
    User(String),
}

pub type Result<T> = std::result::Result<T, TypeRaceError>;

impl TypeRaceError {
    pub fn config(msg: impl Into<String>) -> Self {
        TypeRaceError::Config(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        TypeRaceError::Persistence(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        TypeRaceError::Broker(msg.into())
    }

    pub fn generator(msg: impl Into<String>) -> Self {
        TypeRaceError::Generator(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        TypeRaceError::Protocol(msg.into())
    }

    pub fn user(msg: impl Into<String>) -> Self {
        TypeRaceError::User(msg.into())
    }

    /// Whether this error should be reported to the health sink as a
    /// surfaced error, per the propagation policy in the error design: user
    /// errors are expected and shown to the player, not logged as errors.
    pub fn is_user_facing_only(&self) -> bool {
        matches!(self, TypeRaceError::User(_))
    }
}

impl From<rusqlite::Error> for TypeRaceError {
    fn from(e: rusqlite::Error) -> Self {
        TypeRaceError::Persistence(e.to_string())
    }
}

impl From<r2d2::Error> for TypeRaceError {
    fn from(e: r2d2::Error) -> Self {
        TypeRaceError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for TypeRaceError {
    fn from(e: serde_json::Error) -> Self {
        TypeRaceError::Protocol(e.to_string())
    }
}

impl From<config::ConfigError> for TypeRaceError {
    fn from(e: config::ConfigError) -> Self {
        TypeRaceError::Config(e.to_string())
    }
}
