use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    #[error("Target unreachable: {0}")]
    TargetUnreachable(String),

    #[error("Invalid shard topology: {0}")]
    InvalidShardTopology(String),

    #[error("Shard name '{0}' conflicts with existing shard: {1}")]
    NameConflict(String, String),

    #[error("Node already initialized with a different identity: {0}")]
    AlreadyInitializedMismatch(String),

    #[error("Cluster not initialized: {0}")]
    NotInitialized(String),

    #[error("Invalid shard name: {0}")]
    InvalidShardName(String),

    #[error("Invalid shard identity document: {0}")]
    InvalidIdentity(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl ShardError {
    /// Returns `true` for failures a caller may resolve by trying again later.
    ///
    /// Every other variant needs a different request or operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TargetUnreachable(_))
    }

    /// Numeric code reported in command replies.
    pub fn code(&self) -> i32 {
        match self {
            Self::TargetUnreachable(_) => 6,
            Self::InvalidShardTopology(_) => 96,
            Self::NameConflict(_, _) => 11000,
            Self::AlreadyInitializedMismatch(_) => 13,
            Self::NotInitialized(_) => 70,
            Self::InvalidShardName(_) => 2,
            Self::InvalidIdentity(_) => 9,
            Self::ParseError(_) => 9,
            Self::ExecutionError(_) => 1,
            Self::LockError(_) => 1,
            Self::IoError(_) => 1,
        }
    }

    /// Symbolic name reported alongside [`ShardError::code`].
    pub fn code_name(&self) -> &'static str {
        match self {
            Self::TargetUnreachable(_) => "TargetUnreachable",
            Self::InvalidShardTopology(_) => "InvalidShardTopology",
            Self::NameConflict(_, _) => "NameConflict",
            Self::AlreadyInitializedMismatch(_) => "AlreadyInitializedMismatch",
            Self::NotInitialized(_) => "NotInitialized",
            Self::InvalidShardName(_) => "InvalidShardName",
            Self::InvalidIdentity(_) => "InvalidIdentity",
            Self::ParseError(_) => "FailedToParse",
            Self::ExecutionError(_) => "InternalError",
            Self::LockError(_) => "InternalError",
            Self::IoError(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;

impl<T> From<std::sync::PoisonError<T>> for ShardError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for ShardError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ShardError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unreachable_is_retryable() {
        assert!(ShardError::TargetUnreachable("h:1".into()).is_retryable());
        assert!(!ShardError::NameConflict("a".into(), "b".into()).is_retryable());
        assert!(!ShardError::NotInitialized("x".into()).is_retryable());
    }

    #[test]
    fn codes_are_stable_for_protocol_errors() {
        assert_eq!(ShardError::TargetUnreachable(String::new()).code(), 6);
        assert_eq!(
            ShardError::AlreadyInitializedMismatch(String::new()).code_name(),
            "AlreadyInitializedMismatch"
        );
    }
}
