//! クライアント認証（POST /v1/auth, POST /v1/auth/refresh）
//!
//! APIユーザーテーブル（キー`clientId`）に保存されたシークレットのハッシュと照合し、
//! トークンの組を発行する。

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};
use chrono::{DateTime, Utc};
use meetup::infrastructure::{KeyedStore, StoreError, string_key};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::auth::{TokenError, TokenManager, TokenPair, TokenUse};
use crate::error::ApiError;

/// APIユーザーテーブルのキー属性
pub const CLIENT_ID_ATTRIBUTE: &str = "clientId";

/// APIユーザー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    pub client_id: String,
    /// クライアントシークレットのbcryptハッシュ（`$2a$`/`$2b$`/`$2y$`）
    pub hashed_client_secret: String,
}

/// クライアントシークレットを保存済みハッシュと照合する
///
/// ハッシュが壊れている場合も不一致として扱う。
pub fn verify_client_secret(secret: &str, hashed: &str) -> bool {
    match bcrypt::verify(secret, hashed) {
        Ok(matched) => matched,
        Err(e) => {
            warn!(error = %e, "保存済みハッシュを解釈できない");
            false
        }
    }
}

/// APIユーザーの取得トレイト
#[async_trait]
pub trait ApiUserRepository: Send + Sync {
    async fn api_user(&self, client_id: &str) -> Result<Option<ApiUser>, StoreError>;
}

/// キー付きストアを使うApiUserRepository実装
pub struct StoreApiUserRepository {
    store: Arc<dyn KeyedStore>,
    table: String,
}

impl StoreApiUserRepository {
    pub fn new(store: Arc<dyn KeyedStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }
}

#[async_trait]
impl ApiUserRepository for StoreApiUserRepository {
    async fn api_user(&self, client_id: &str) -> Result<Option<ApiUser>, StoreError> {
        let item = self
            .store
            .get_item(&self.table, string_key(CLIENT_ID_ATTRIBUTE, client_id))
            .await?;

        item.map(|item| serde_dynamo::from_item(item).map_err(|e| StoreError::ReadError(e.to_string())))
            .transpose()
    }
}

/// 認証処理のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthServiceError {
    #[error("provided credentials are invalid")]
    InvalidCredentials,

    #[error("api user lookup failed: {0}")]
    Store(#[from] StoreError),

    #[error("token issue failed: {0}")]
    Token(TokenError),
}

impl From<AuthServiceError> for ApiError {
    fn from(err: AuthServiceError) -> Self {
        match err {
            AuthServiceError::InvalidCredentials => ApiError::unauthorized(),
            other => {
                error!(error = %other, "認証処理でエラー");
                ApiError::internal_error()
            }
        }
    }
}

/// クライアント認証サービス
pub struct AuthService {
    users: Arc<dyn ApiUserRepository>,
    tokens: Arc<TokenManager>,
}

impl AuthService {
    pub fn new(users: Arc<dyn ApiUserRepository>, tokens: Arc<TokenManager>) -> Self {
        Self { users, tokens }
    }

    /// クライアントIDとシークレットで認証する
    #[instrument(skip(self, client_secret))]
    pub async fn authenticate(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenPair, AuthServiceError> {
        let Some(user) = self.users.api_user(client_id).await? else {
            warn!("未登録のクライアント");
            return Err(AuthServiceError::InvalidCredentials);
        };

        if !verify_client_secret(client_secret, &user.hashed_client_secret) {
            warn!("クライアントシークレットが一致しない");
            return Err(AuthServiceError::InvalidCredentials);
        }

        info!("クライアントを認証");
        self.tokens.issue(client_id).map_err(AuthServiceError::Token)
    }

    /// リフレッシュトークンで新しいトークンの組を発行する
    ///
    /// クライアントが削除済みの場合は拒否する。
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthServiceError> {
        let client_id = self
            .tokens
            .validate(refresh_token, TokenUse::Refresh)
            .map_err(|_| AuthServiceError::InvalidCredentials)?;

        if self.users.api_user(&client_id).await?.is_none() {
            warn!(client_id = %client_id, "リフレッシュ対象のクライアントが存在しない");
            return Err(AuthServiceError::InvalidCredentials);
        }

        info!(client_id = %client_id, "トークンを更新");
        self.tokens.issue(&client_id).map_err(AuthServiceError::Token)
    }
}

// ============================================================================
// HTTPハンドラー
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

impl From<TokenPair> for AuthResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            access_token_expires_at: pair.access_token_expires_at,
            refresh_token: pair.refresh_token,
            refresh_token_expires_at: pair.refresh_token_expires_at,
        }
    }
}

/// POST /v1/auth
async fn authenticate(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if request.client_id.is_empty() || request.client_secret.is_empty() {
        return Err(ApiError::bad_request("clientId and clientSecret are required"));
    }

    let pair = service
        .authenticate(&request.client_id, &request.client_secret)
        .await?;
    Ok(Json(pair.into()))
}

/// POST /v1/auth/refresh
async fn refresh(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if request.refresh_token.is_empty() {
        return Err(ApiError::bad_request("refreshToken is required"));
    }

    let pair = service.refresh(&request.refresh_token).await?;
    Ok(Json(pair.into()))
}

/// 認証エンドポイントのルーター
pub fn routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/v1/auth", post(authenticate))
        .route("/v1/auth/refresh", post(refresh))
        .with_state(service)
}
