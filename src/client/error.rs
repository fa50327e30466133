//! Client-side error type.

use serde::Deserialize;

/// Everything that can go wrong on the client side of an API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request never produced a response. Timeouts and refused
    /// connections are retriable.
    Network { message: String, retriable: bool },
    /// The server answered with a non-success status.
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// Local persisted state could not be read or written.
    Storage(String),
    /// The operation needs a session and there is none.
    NotAuthenticated,
    /// A response or stored value did not have the expected shape.
    Decode(String),
}

impl ClientError {
    /// Human-readable text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Network { retriable: true, .. } => {
                "Unable to reach the server. Please check your connection and try again.".into()
            }
            ClientError::Network { .. } => "The request could not be sent.".into(),
            ClientError::Api { message, .. } => message.clone(),
            ClientError::Storage(_) => "Could not access saved data on this device.".into(),
            ClientError::NotAuthenticated => "Please log in to continue.".into(),
            ClientError::Decode(_) => "Received an unexpected response from the server.".into(),
        }
    }

    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Machine-readable error code sent by the server, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Whether the same call might succeed later without user action.
    pub fn is_retriable(&self) -> bool {
        match self {
            ClientError::Network { retriable, .. } => *retriable,
            ClientError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Build an API error from a non-success response.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        #[derive(Deserialize)]
        struct ErrorBody {
            error: Option<String>,
            message: Option<String>,
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).ok();

        let (code, message) = match body {
            Some(ErrorBody { error, message }) => (error, message),
            None => (None, None),
        };
        let message = message
            .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            });

        ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ClientError::Decode(e.to_string());
        }
        let retriable = e.is_timeout() || e.is_connect() || e.is_request();
        ClientError::Network {
            message: e.to_string(),
            retriable,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Network { message, .. } => write!(f, "Network error: {}", message),
            ClientError::Api {
                status,
                code: Some(code),
                message,
            } => write!(f, "API error {} ({}): {}", status, code, message),
            ClientError::Api {
                status, message, ..
            } => write!(f, "API error {}: {}", status, message),
            ClientError::Storage(e) => write!(f, "Storage error: {}", e),
            ClientError::NotAuthenticated => write!(f, "Not authenticated"),
            ClientError::Decode(e) => write!(f, "Decode error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_prefers_server_text() {
        let err = ClientError::Api {
            status: 401,
            code: Some("INVALID_CREDENTIALS".into()),
            message: "Email or password is incorrect".into(),
        };
        assert_eq!(err.user_message(), "Email or password is incorrect");
        assert!(err.is_unauthorized());
        assert_eq!(err.code(), Some("INVALID_CREDENTIALS"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_retriable_classification() {
        let timeout = ClientError::Network {
            message: "timed out".into(),
            retriable: true,
        };
        assert!(timeout.is_retriable());
        assert!(!ClientError::NotAuthenticated.is_retriable());
        let server = ClientError::Api {
            status: 503,
            code: None,
            message: "Service Unavailable".into(),
        };
        assert!(server.is_retriable());
    }
}
