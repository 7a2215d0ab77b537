use thiserror::Error;

use crate::state::ActionOutcome;

/// Failure at the request/response boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("request rejected ({status}): {code}")]
    Api { status: u16, code: String },

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("decode error: {0}")]
    Decode(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl BackendError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Unauthorized)
    }

    /// Backend-provided error code, if the server sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::Api { code, .. } => Some(code.as_str()),
            BackendError::NotFound => Some("not_found"),
            _ => None,
        }
    }

    /// Collapse into the success-flag/message tuple handed to the UI.
    pub fn into_outcome(self, context: ErrorContext) -> ActionOutcome {
        match self {
            BackendError::Unauthorized => ActionOutcome::unauthorized(),
            other => ActionOutcome::failed(match other.code() {
                Some(code) => user_message(context, code),
                None => GENERIC_ERROR.to_string(),
            }),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::Status(status.as_u16())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Decode(e.to_string())
    }
}

pub const GENERIC_ERROR: &str = "Something went wrong. Please try again.";

/// Which vocabulary a call site understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    General,
    Invite,
    Redeem,
}

/// Translate a backend error code for the UI. Codes outside the context's vocabulary fall back
/// to the generic message.
pub fn user_message(context: ErrorContext, code: &str) -> String {
    let known = match (context, code) {
        (ErrorContext::Invite, "date_overlap") => {
            Some("You already have another exit at that time.")
        }
        (ErrorContext::Invite, "user_already_in_exit") => {
            Some("That user is already part of this exit.")
        }
        (ErrorContext::Invite | ErrorContext::General, "user_not_found") => {
            Some("That user doesn't exist.")
        }
        (ErrorContext::Redeem, "token_not_found") => {
            Some("This code is not valid or was already used.")
        }
        (ErrorContext::Redeem, "offer_expired") => Some("This offer has expired."),
        (_, "not_found") => Some("Not found."),
        _ => None,
    };
    match known {
        Some(msg) => msg.to_string(),
        None => {
            tracing::debug!(?context, code, "untranslated error code");
            GENERIC_ERROR.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_codes_are_translated() {
        assert_eq!(
            user_message(ErrorContext::Invite, "date_overlap"),
            "You already have another exit at that time."
        );
        assert_eq!(
            user_message(ErrorContext::Invite, "user_already_in_exit"),
            "That user is already part of this exit."
        );
    }

    #[test]
    fn code_outside_vocabulary_falls_back_to_generic() {
        assert_eq!(
            user_message(ErrorContext::Invite, "token_not_found"),
            GENERIC_ERROR
        );
        assert_eq!(user_message(ErrorContext::Redeem, "brand_new_code"), GENERIC_ERROR);
    }

    #[test]
    fn unauthorized_becomes_distinct_outcome() {
        let outcome = BackendError::Unauthorized.into_outcome(ErrorContext::General);
        assert!(!outcome.ok);
        assert!(outcome.unauthorized);
        assert_eq!(outcome.message, None);
    }

    #[test]
    fn network_failure_gets_generic_message() {
        let outcome =
            BackendError::Network("connection reset".into()).into_outcome(ErrorContext::Redeem);
        assert!(!outcome.ok);
        assert!(!outcome.unauthorized);
        assert_eq!(outcome.message.as_deref(), Some(GENERIC_ERROR));
    }
}
