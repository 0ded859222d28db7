//! Authentication failure taxonomy

use thiserror::Error;

/// Why a presented credential was rejected
///
/// Kept for logs and metrics only. Every variant maps to the same
/// client-facing message so callers cannot tell which keys exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Malformed,
    NotFound,
    HashMismatch,
    Inactive,
    Revoked,
    Expired,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::NotFound => "not_found",
            Self::HashMismatch => "hash_mismatch",
            Self::Inactive => "inactive",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a failed gateway decision
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no API key credential presented")]
    MissingCredential,

    #[error("invalid API key ({0})")]
    InvalidCredential(InvalidReason),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication backend unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl AuthError {
    pub fn invalid(reason: InvalidReason) -> Self {
        Self::InvalidCredential(reason)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(message.into())
    }

    /// Message returned to the client; never distinguishes invalid reasons
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingCredential => "API key is required",
            Self::InvalidCredential(_) => "Invalid API key",
            Self::RateLimited { .. } => "Rate limit exceeded",
            Self::UpstreamUnavailable(_) => "Authentication service unavailable",
        }
    }

    /// Stable label used for metrics and structured logs
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential(_) => "invalid_credential",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_reasons_share_public_message() {
        let reasons = [
            InvalidReason::Malformed,
            InvalidReason::NotFound,
            InvalidReason::HashMismatch,
            InvalidReason::Inactive,
            InvalidReason::Revoked,
            InvalidReason::Expired,
        ];

        for reason in reasons {
            assert_eq!(AuthError::invalid(reason).public_message(), "Invalid API key");
        }
    }

    #[test]
    fn test_public_messages() {
        assert_eq!(AuthError::MissingCredential.public_message(), "API key is required");
        assert_eq!(
            AuthError::RateLimited { retry_after_secs: 12 }.public_message(),
            "Rate limit exceeded"
        );
        assert_eq!(
            AuthError::unavailable("db down").public_message(),
            "Authentication service unavailable"
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(AuthError::MissingCredential.outcome(), "missing_credential");
        assert_eq!(
            AuthError::invalid(InvalidReason::Expired).outcome(),
            "invalid_credential"
        );
        assert_eq!(AuthError::RateLimited { retry_after_secs: 1 }.outcome(), "rate_limited");
        assert_eq!(AuthError::unavailable("x").outcome(), "upstream_unavailable");
    }
}
