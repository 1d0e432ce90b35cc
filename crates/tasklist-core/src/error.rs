use thiserror::Error;

/// Failure of a single request to the task service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server responded with status {status}")]
    Http { status: u16, detail: Option<String> },

    #[error("{0}")]
    Validation(String),
}

impl ClientError {
    /// Message supplied by the service in the `detail` field of an error body.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ClientError::Http { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::Network(err) => err.status().map(|s| s.as_u16()),
            ClientError::Validation(_) => None,
        }
    }
}

/// Pulls `detail` out of an error body of the form `{"detail": "..."}`.
/// Anything else, including a structured `detail`, yields `None`.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_is_read_from_json_body() {
        assert_eq!(
            extract_detail(r#"{"detail":"User not found with this email"}"#).as_deref(),
            Some("User not found with this email")
        );
    }

    #[test]
    fn non_string_or_missing_detail_is_ignored() {
        assert_eq!(extract_detail(r#"{"detail":[{"loc":["body"]}]}"#), None);
        assert_eq!(extract_detail(r#"{"message":"nope"}"#), None);
        assert_eq!(extract_detail("Internal Server Error"), None);
        assert_eq!(extract_detail(r#"{"detail":"  "}"#), None);
    }
}
