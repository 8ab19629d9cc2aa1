//! Error types shared by the client and the browser worker.

use thiserror::Error;

use crate::protocol::JsonRpcError;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Client and worker errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport or process could not be established, or broke mid-call.
    #[error("connection error: {0}")]
    Connection(String),

    /// Credentials are missing or have expired.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The remote tool ran but failed.
    #[error("tool error {code}: {message}")]
    Tool {
        /// Remote error code.
        code: i32,
        /// Remote error message.
        message: String,
        /// Additional data sent by the server.
        data: Option<serde_json::Value>,
    },

    /// The remote site is throttling requests.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Tool not found.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Invalid parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Browser automation failure.
    #[error("browser error: {0}")]
    Browser(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify a JSON-RPC error descriptor received from the server.
    ///
    /// The reserved [`codes::AUTHENTICATION_REQUIRED`] code becomes
    /// [`Error::Authentication`]; every other code is a generic tool failure.
    pub fn from_rpc(error: JsonRpcError) -> Self {
        if error.code == codes::AUTHENTICATION_REQUIRED {
            Error::Authentication(error.message)
        } else {
            Error::Tool {
                code: error.code,
                message: error.message,
                data: error.data,
            }
        }
    }

    /// Get the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::Connection(_) => codes::INTERNAL_ERROR,
            Error::Authentication(_) => codes::AUTHENTICATION_REQUIRED,
            Error::Tool { code, .. } => *code,
            Error::RateLimit(_) => codes::RATE_LIMITED,
            Error::ToolNotFound(_) => codes::METHOD_NOT_FOUND,
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::Browser(_) => codes::TOOL_FAILED,
            Error::Serialization(_) => codes::PARSE_ERROR,
            Error::Io(_) => codes::TOOL_FAILED,
        }
    }

    /// Whether the caller should re-establish credentials before retrying.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

/// JSON-RPC error codes.
pub mod codes {
    /// Parse error.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Authentication required or expired (reserved).
    pub const AUTHENTICATION_REQUIRED: i32 = -32000;
    /// Remote site is rate limiting.
    pub const RATE_LIMITED: i32 = -32001;
    /// Tool executed but failed.
    pub const TOOL_FAILED: i32 = -32002;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(code: i32, message: &str) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[test]
    fn test_reserved_code_is_authentication() {
        let err = Error::from_rpc(rpc(-32000, "session expired"));
        assert!(matches!(err, Error::Authentication(ref m) if m == "session expired"));
        assert!(err.is_authentication());
    }

    #[test]
    fn test_other_codes_are_tool_errors() {
        for code in [-32001, -32601, -1, 0, 42] {
            match Error::from_rpc(rpc(code, "boom")) {
                Error::Tool { code: c, message, .. } => {
                    assert_eq!(c, code);
                    assert_eq!(message, "boom");
                }
                other => panic!("expected tool error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_tool_error_keeps_data() {
        let mut error = rpc(-32002, "scrape failed");
        error.data = Some(serde_json::json!({"selector": "h1"}));
        match Error::from_rpc(error) {
            Error::Tool { data, .. } => assert_eq!(data.unwrap()["selector"], "h1"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_codes_round_trip_through_wire() {
        let err = Error::Authentication("no cookie".into());
        let wire = err.to_json_rpc_error();
        assert_eq!(wire.code, codes::AUTHENTICATION_REQUIRED);
        assert!(Error::from_rpc(wire).is_authentication());

        assert_eq!(Error::RateLimit("slow down".into()).code(), codes::RATE_LIMITED);
        assert_eq!(Error::ToolNotFound("x".into()).code(), codes::METHOD_NOT_FOUND);
    }
}
