//! トークン管理と認証ミドルウェア
//!
//! - アクセストークン（15分）とリフレッシュトークン（30日）をHS256で発行
//! - 有効期限は注入された時計で検証する（テストで時刻を固定できるように）
//! - `Authorization: Bearer <token>`を検証し、クライアントIDをリクエストの拡張に格納
//! - 不正なトークン時は401 Unauthorized（Problem Details）を返却

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use meetup::domain::Clock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ApiError;

/// アクセストークンの有効期間（分）
pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;

/// リフレッシュトークンの有効期間（日）
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// トークンの用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// トークンのクレーム
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// クライアントID
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub token_use: TokenUse,
}

/// トークン検証・発行のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// 発行したトークンの組
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// 認証済みクライアント（ミドルウェアがリクエスト拡張に格納する）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient(pub String);

/// HS256トークンの発行と検証
pub struct TokenManager {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl TokenManager {
    /// 新しいTokenManagerを作成
    ///
    /// # 引数
    /// * `secret` - 署名用の共有鍵
    /// * `issuer` - `iss`クレーム（検証時も一致を要求）
    /// * `clock` - 発行時刻と有効期限の判定に使う時計
    pub fn new(secret: &[u8], issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            clock,
        }
    }

    /// アクセストークンとリフレッシュトークンを発行する
    pub fn issue(&self, client_id: &str) -> Result<TokenPair, TokenError> {
        let now = self.clock.now();
        let access_token_expires_at = now + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES);
        let refresh_token_expires_at = now + Duration::days(REFRESH_TOKEN_TTL_DAYS);

        Ok(TokenPair {
            access_token: self.sign(client_id, TokenUse::Access, now, access_token_expires_at)?,
            access_token_expires_at,
            refresh_token: self.sign(client_id, TokenUse::Refresh, now, refresh_token_expires_at)?,
            refresh_token_expires_at,
        })
    }

    fn sign(
        &self,
        client_id: &str,
        token_use: TokenUse,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: client_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            token_use,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// トークンを検証し、クライアントIDを返す
    ///
    /// 署名、発行者、用途、有効期限（注入された時計基準）をすべて確認する。
    pub fn validate(&self, token: &str, expected: TokenUse) -> Result<String, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                debug!(error = %e, "トークンのデコードに失敗");
                TokenError::Invalid
            })?;
        let claims = data.claims;

        if claims.token_use != expected || claims.sub.is_empty() {
            return Err(TokenError::Invalid);
        }
        if claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims.sub)
    }
}

/// `Authorization`ヘッダーからBearerトークンを取り出す（スキーム名は大文字小文字を区別しない）
fn bearer_token(value: &str) -> Option<&str> {
    let mut parts = value.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

/// 認証ミドルウェア
///
/// 保護されたルートに`route_layer`で適用する。
pub async fn auth_middleware(
    State(tokens): State<Arc<TokenManager>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token);

    let Some(token) = token else {
        warn!(path = %request.uri().path(), "Bearerトークンがありません");
        return ApiError::unauthorized().into_response();
    };

    match tokens.validate(token, TokenUse::Access) {
        Ok(client_id) => {
            request.extensions_mut().insert(AuthenticatedClient(client_id));
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %request.uri().path(), error = %e, "無効なアクセストークン");
            ApiError::unauthorized().into_response()
        }
    }
}
