//! JSON response envelope shared by every command.

use serde::{Deserialize, Serialize};
use vdisk_storage::{ErrorKind, StorageError};

/// Structured failure carried in the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl From<&StorageError> for ErrorBody {
    fn from(err: &StorageError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// `{ "success": ..., "data": ..., "error": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Operation payload on success.
    pub data: Option<serde_json::Value>,
    /// Failure details otherwise.
    pub error: Option<ErrorBody>,
}

impl ApiResponse {
    /// Successful response carrying `data`.
    pub fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                data: Some(value),
                error: None,
            },
            Err(e) => Self::fail(ErrorBody {
                kind: ErrorKind::PersistenceFailure,
                message: format!("failed to encode response: {}", e),
            }),
        }
    }

    /// Successful response without a payload.
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    /// Failed response.
    pub fn fail(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// Wraps an operation result.
    pub fn from_result<T: Serialize>(result: Result<T, StorageError>) -> Self {
        match result {
            Ok(data) => Self::ok(&data),
            Err(e) => Self::fail(ErrorBody::from(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_envelope() {
        let resp = ApiResponse::ok(&json!({ "fileId": 1 }));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({ "success": true, "data": { "fileId": 1 }, "error": null })
        );
    }

    #[test]
    fn test_empty_envelope() {
        let value = serde_json::to_value(ApiResponse::empty()).unwrap();
        assert_eq!(value, json!({ "success": true, "data": null, "error": null }));
    }

    #[test]
    fn test_error_envelope() {
        let resp: ApiResponse =
            ApiResponse::from_result::<()>(Err(StorageError::NoContiguousSpace { requested: 9 }));
        assert!(!resp.success);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["kind"], "allocation_failure");
        assert_eq!(
            value["error"]["message"],
            "No contiguous space: no run of 9 free blocks"
        );
        assert!(value["data"].is_null());
    }
}
