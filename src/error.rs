use std::fmt;

use thiserror::Error;

/// Resource kinds that can be reported missing to the caller.
///
/// Task lookups never surface here: a missing task is a structured tool
/// outcome, not a pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Conversation,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Conversation => write!(f, "conversation"),
        }
    }
}

/// The externally observable failure surface of the pipeline.
///
/// A `NotFound` is identical whether the resource is absent, soft-deleted,
/// or owned by someone else.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    Auth,

    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("model capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable code, one per externally observable status.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Auth => "AUTH_ERROR",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound(Resource::Conversation) => "CONVERSATION_NOT_FOUND",
            AppError::CapabilityUnavailable(_) => "AI_SERVICE_UNAVAILABLE",
            AppError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Short, non-technical explanation safe to show to the end user.
    ///
    /// Internal details stay in the server logs; nothing from the store or
    /// the model endpoint crosses this boundary.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth => "Please sign in to continue.".to_string(),
            AppError::Validation { message, .. } => message.clone(),
            AppError::NotFound(resource) => format!("{} not found.", capitalize(resource)),
            AppError::CapabilityUnavailable(_) => {
                "The assistant is unavailable right now. Your tasks can still be managed \
                 directly; please try chatting again in a moment."
                    .to_string()
            }
            AppError::RateLimited { retry_after_secs } => format!(
                "Too many requests. Please try again in {} seconds.",
                retry_after_secs
            ),
            AppError::Internal(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

fn capitalize(resource: &Resource) -> String {
    let s = resource.to_string();
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_variant() {
        let errors = [
            AppError::Auth,
            AppError::validation("message", "Message cannot be empty."),
            AppError::NotFound(Resource::Conversation),
            AppError::CapabilityUnavailable("timed out".to_string()),
            AppError::RateLimited {
                retry_after_secs: 30,
            },
            AppError::Internal(anyhow::anyhow!("boom")),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn internal_error_is_opaque_to_users() {
        let err = AppError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3:5432"));
        assert!(!err.user_message().contains("10.0.0.3"));
    }
}
