use crate::core::{CollectionSchema, ErrorCode, MetaError, Timestamp, UniqueId};
use serde::{Deserialize, Serialize};

/// Outcome carried by every facade response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub error_code: ErrorCode,
    pub reason: String,
}

impl Status {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.error_code == ErrorCode::Success
    }

    pub fn is_retryable(&self) -> bool {
        self.error_code == ErrorCode::Unavailable
    }
}

impl From<&MetaError> for Status {
    fn from(err: &MetaError) -> Self {
        Self {
            error_code: err.code(),
            reason: err.to_string(),
        }
    }
}

impl<T> From<&crate::core::Result<T>> for Status {
    fn from(result: &crate::core::Result<T>) -> Self {
        match result {
            Ok(_) => Status::success(),
            Err(err) => Status::from(err),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolResponse {
    pub status: Status,
    pub value: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringListResponse {
    pub status: Status,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub status: Status,
    /// `None` unless `status` is a success
    pub schema: Option<CollectionSchema>,
    pub id: UniqueId,
    pub create_time: Timestamp,
    pub statistics: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescription {
    pub status: Status,
    pub id: UniqueId,
    pub collection_name: String,
    pub tag: String,
    pub create_time: Timestamp,
    pub statistics: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsoResponse {
    pub status: Status,
    /// First timestamp of the allocated range
    pub timestamp: Timestamp,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdResponse {
    pub status: Status,
    /// First ID of the allocated range
    pub id: UniqueId,
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_error() {
        let status = Status::from(&MetaError::QueueFull(8));
        assert_eq!(status.error_code, ErrorCode::Unavailable);
        assert_eq!(status.reason, "scheduler queue is full (capacity 8)");
        assert!(status.is_retryable());
        assert!(!status.is_success());
    }

    #[test]
    fn test_status_serializes_code() {
        let json = serde_json::to_string(&Status::success()).unwrap();
        assert!(json.contains("Success"));
    }
}
