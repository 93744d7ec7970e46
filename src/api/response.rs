//! API response types for consistent JSON responses

use serde::Serialize;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful
    pub success: bool,
    /// Response message
    pub message: String,
    /// Response data (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful response with data
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Relay statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Server name from configuration
    pub server: String,
    /// Server version
    pub version: String,
    /// Number of connected sessions
    pub sessions: usize,
    /// Sessions without a page scope
    pub unscoped: usize,
    /// Sessions per page scope
    pub pages: Vec<PageStats>,
}

/// Session count for one page scope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStats {
    pub page_id: String,
    pub sessions: usize,
}
