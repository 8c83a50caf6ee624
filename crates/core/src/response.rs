//! Backend response envelope
//!
//! Every storage adapter call returns a `Response<T>` distinguishing
//! success, not-found, and other errors, with timing and provenance
//! attached. Adapters outside the core (connectors, remotes) speak the
//! same envelope.

use serde::{Deserialize, Serialize};

/// Machine-readable error code carried by a failed response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    /// Operation succeeded
    Ok,
    /// Entity absent; non-fatal
    NotFound,
    /// Any other failure
    Error,
}

/// Result envelope returned by backend operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T> {
    /// Whether the operation succeeded
    pub success: bool,
    /// Payload on success
    pub data: Option<T>,
    /// Status discriminator
    pub error_code: ResponseCode,
    /// Failure description on error
    pub message: Option<String>,
    /// Wall-clock duration of the backend call
    pub execution_time_ms: f64,
    /// Which backend produced this response
    pub backend_name: String,
    /// Path or hash the operation targeted
    pub path: Option<String>,
}

impl<T> Response<T> {
    /// Successful response carrying data
    pub fn ok(
        data: T,
        execution_time_ms: f64,
        backend_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Response {
            success: true,
            data: Some(data),
            error_code: ResponseCode::Ok,
            message: None,
            execution_time_ms,
            backend_name: backend_name.into(),
            path: Some(path.into()),
        }
    }

    /// Entity-absent response
    pub fn not_found(
        message: impl Into<String>,
        execution_time_ms: f64,
        backend_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Response {
            success: false,
            data: None,
            error_code: ResponseCode::NotFound,
            message: Some(message.into()),
            execution_time_ms,
            backend_name: backend_name.into(),
            path: Some(path.into()),
        }
    }

    /// General failure response
    pub fn error(
        message: impl Into<String>,
        execution_time_ms: f64,
        backend_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Response {
            success: false,
            data: None,
            error_code: ResponseCode::Error,
            message: Some(message.into()),
            execution_time_ms,
            backend_name: backend_name.into(),
            path: Some(path.into()),
        }
    }

    /// Whether this is a not-found response
    pub fn is_not_found(&self) -> bool {
        self.error_code == ResponseCode::NotFound
    }

    /// Unwrap the payload, converting failures into typed errors
    pub fn into_result(self) -> crate::error::Result<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(crate::error::NexusError::backend(
                self.backend_name,
                "success response with no data",
            )),
            (false, _) => {
                let message = self.message.unwrap_or_else(|| "unknown error".to_string());
                if self.error_code == ResponseCode::NotFound {
                    Err(crate::error::NexusError::NotFound(
                        self.path.unwrap_or(message),
                    ))
                } else {
                    Err(crate::error::NexusError::backend(self.backend_name, message))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response() {
        let r = Response::ok("abc123", 1.5, "local", "abc123");
        assert!(r.success);
        assert_eq!(r.error_code, ResponseCode::Ok);
        assert_eq!(r.into_result().unwrap(), "abc123");
    }

    #[test]
    fn test_not_found_response() {
        let r: Response<Vec<u8>> = Response::not_found("no such blob", 0.2, "local", "deadbeef");
        assert!(!r.success);
        assert!(r.is_not_found());
        let err = r.into_result().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_response() {
        let r: Response<()> = Response::error("disk on fire", 3.0, "local", "/x");
        let err = r.into_result().unwrap_err();
        assert!(matches!(
            err,
            crate::error::NexusError::Backend { .. }
        ));
    }
}
