//! APIエラーハンドリング
//!
//! すべてのエラーはRFC 7807のProblem Details（`application/problem+json`）で返却する。
//! `type`は常に`about:blank`で、`title`はステータスの標準文言。

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Problem DetailsのContent-Type
pub const PROBLEM_JSON: &str = "application/problem+json";

/// Problem Detailsのボディ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// APIエラー
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    body: ProblemDetails,
}

impl ApiError {
    /// ステータスのみのエラーを作成
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type: "about:blank".to_string(),
                title: status.canonical_reason().unwrap_or("Unknown").to_string(),
                status: status.as_u16(),
                detail: None,
            },
        }
    }

    /// 詳細メッセージを付与する
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.body.detail = Some(detail.into());
        self
    }

    /// 400 Bad Request
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::from_status(StatusCode::BAD_REQUEST).with_detail(detail)
    }

    /// 401 Unauthorized
    pub fn unauthorized() -> Self {
        Self::from_status(StatusCode::UNAUTHORIZED)
    }

    /// 404 Not Found
    pub fn not_found() -> Self {
        Self::from_status(StatusCode::NOT_FOUND)
    }

    /// 500 Internal Server Error（内部の詳細は返さない）
    pub fn internal_error() -> Self {
        Self::from_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ProblemDetails {
        &self.body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON))],
            Json(self.body),
        )
            .into_response()
    }
}
