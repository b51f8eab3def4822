//! Meetup APIのアクセストークンキャッシュ
//!
//! JWTベアラーグラント（RFC 7523）で取得したアクセストークンを1つだけ保持し、
//! 未取得または期限切れ間近のときに更新する。確認から更新までを1つのロックで囲むため、
//! 同時に何件呼ばれてもトークンエンドポイントへのリクエストは高々1件になる。

use crate::domain::Clock;
use crate::infrastructure::config::MeetupAuthConfig;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

/// JWTベアラーグラントのgrant_type
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// アサーションのaudience
pub const MEETUP_AUDIENCE: &str = "api.meetup.com";

/// Meetupが要求するUser-Agent（デフォルトのUser-Agentは拒否される）
pub const MEETUP_USER_AGENT: &str = "curl/8.7.1";

/// 残り時間がこれ以下のトークンは期限切れ間近として扱う
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// アサーションの有効期間
pub const ASSERTION_TTL_MINUTES: i64 = 10;

/// トークン取得のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// JWTアサーションの署名に失敗（秘密鍵の形式不正など）
    #[error("JWTアサーションの署名に失敗: {0}")]
    Signing(String),

    /// HTTP通信エラー
    #[error("トークン取得リクエストに失敗: {0}")]
    Transport(String),

    /// 200以外のステータス
    #[error("invalid status code when fetching token: {0}")]
    InvalidStatus(u16),

    /// レスポンスのJSONデコードに失敗
    #[error("トークンレスポンスのデコードに失敗: {0}")]
    Decode(String),
}

/// アクセストークンを提供するトレイト
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// 有効なアクセストークンを返す（必要なら更新する）
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// キャッシュされたトークン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    /// 取得時刻 + expires_in
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// 指定時刻で期限切れ間近かどうか
    ///
    /// 残りがちょうど`EXPIRY_MARGIN_SECS`秒なら、まだ使える。
    pub fn is_expiring(&self, at: DateTime<Utc>) -> bool {
        at > self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// アサーションのクレーム
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionClaims {
    /// クライアントキー
    pub iss: String,
    /// MeetupのユーザーID
    pub sub: String,
    pub aud: Vec<String>,
    /// 有効期限（UNIX秒）
    pub exp: i64,
}

/// トークンエンドポイントのレスポンス
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    refresh_token: Option<String>,
}

/// Meetupのトークンエンドポイントを使うAuthHandler実装
pub struct MeetupAuthHandler {
    config: MeetupAuthConfig,
    http_client: reqwest::Client,
    clock: Arc<dyn Clock>,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for MeetupAuthHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetupAuthHandler")
            .field("auth_url", &self.config.auth_url())
            .finish_non_exhaustive()
    }
}

impl MeetupAuthHandler {
    /// 新しいMeetupAuthHandlerを作成
    ///
    /// # 引数
    /// * `config` - 認証設定
    /// * `http_client` - HTTPクライアント（タイムアウトは呼び出し側で設定）
    /// * `clock` - 有効期限の計算に使う時刻
    pub fn new(config: MeetupAuthConfig, http_client: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            http_client,
            clock,
            token: Mutex::new(None),
        }
    }

    /// 署名済みアサーションを作成する
    pub fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = AssertionClaims {
            iss: self.config.client_key().to_string(),
            sub: self.config.user_id().to_string(),
            aud: vec![MEETUP_AUDIENCE.to_string()],
            exp: (now + Duration::minutes(ASSERTION_TTL_MINUTES)).timestamp(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.config.signing_key_id().to_string());

        let key = EncodingKey::from_rsa_pem(self.config.private_key())
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        jsonwebtoken::encode(&header, &claims, &key).map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// トークンエンドポイントから新しいトークンを取得する
    async fn fetch_token(&self) -> Result<CachedToken, AuthError> {
        let assertion = self.signed_assertion(self.clock.now())?;

        let response = self
            .http_client
            .post(self.config.auth_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, MEETUP_USER_AGENT)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT_TYPE),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "トークンエンドポイントがエラーを返却");
            return Err(AuthError::InvalidStatus(status.as_u16()));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))?;

        let expires_at = Duration::try_seconds(token.expires_in)
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .ok_or_else(|| {
                AuthError::Decode(format!("expires_in out of range: {}", token.expires_in))
            })?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl AuthHandler for MeetupAuthHandler {
    #[instrument(skip(self))]
    async fn access_token(&self) -> Result<String, AuthError> {
        // 確認と更新を同じロック内で行う
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref()
            && !token.is_expiring(self.clock.now())
        {
            return Ok(token.access_token.clone());
        }

        info!("Meetupのアクセストークンを取得");
        let token = self.fetch_token().await.inspect_err(|e| {
            error!(error = %e, "アクセストークンの取得に失敗");
        })?;

        info!(expires_at = %token.expires_at, "アクセストークンを更新");
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::FixedClock;
    use axum::{Form, Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
    use chrono::TimeZone;
    use jsonwebtoken::{DecodingKey, Validation};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const TEST_PRIVATE_KEY: &str = include_str!("../../testdata/meetup_test_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../../testdata/meetup_test_key.pub.pem");

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
    }

    /// トークンサーバーのふるまい
    #[derive(Clone)]
    struct TokenServer {
        calls: Arc<AtomicUsize>,
        status: StatusCode,
        expires_in: i64,
        delay_ms: u64,
        forms: Arc<std::sync::Mutex<Vec<(HashMap<String, String>, Option<String>)>>>,
    }

    impl TokenServer {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                status: StatusCode::OK,
                expires_in: 3600,
                delay_ms: 0,
                forms: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    async fn token_endpoint(
        State(server): State<TokenServer>,
        headers: axum::http::HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> axum::response::Response {
        let n = server.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let user_agent = headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        server.forms.lock().unwrap().push((form, user_agent));

        if server.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(server.delay_ms)).await;
        }
        if server.status != StatusCode::OK {
            return (server.status, "nope").into_response();
        }

        Json(serde_json::json!({
            "access_token": format!("token-{}", n),
            "refresh_token": "refresh",
            "expires_in": server.expires_in,
            "token_type": "bearer"
        }))
        .into_response()
    }

    /// モックのトークンサーバーを起動してURLを返す
    async fn spawn_token_server(server: TokenServer) -> String {
        let app = Router::new()
            .route("/oauth2/access", post(token_endpoint))
            .with_state(server);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/oauth2/access", addr)
    }

    fn config(auth_url: &str) -> MeetupAuthConfig {
        MeetupAuthConfig::new(auth_url, "user-42", "client-key", "kid-1", TEST_PRIVATE_KEY.as_bytes().to_vec())
    }

    fn handler(auth_url: &str, clock: Arc<FixedClock>) -> MeetupAuthHandler {
        MeetupAuthHandler::new(config(auth_url), reqwest::Client::new(), clock)
    }

    // ==================== 有効期限の境界 ====================

    #[test]
    fn test_token_with_exactly_margin_is_not_expiring() {
        let token = CachedToken {
            access_token: "t".into(),
            expires_at: start() + Duration::seconds(30),
        };
        assert!(!token.is_expiring(start()));
    }

    #[test]
    fn test_token_below_margin_is_expiring() {
        let token = CachedToken {
            access_token: "t".into(),
            expires_at: start() + Duration::seconds(29),
        };
        assert!(token.is_expiring(start()));
    }

    #[test]
    fn test_token_at_margin_becomes_expiring_one_second_later() {
        let token = CachedToken {
            access_token: "t".into(),
            expires_at: start() + Duration::seconds(30),
        };
        assert!(token.is_expiring(start() + Duration::seconds(1)));
    }

    // ==================== アサーション ====================

    #[test]
    fn test_signed_assertion_claims_and_header() {
        let handler = handler("http://localhost/unused", Arc::new(FixedClock::new(start())));
        let jwt = handler.signed_assertion(start()).unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("kid-1"));

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[MEETUP_AUDIENCE]);
        validation.validate_exp = false;
        let decoded = jsonwebtoken::decode::<AssertionClaims>(
            &jwt,
            &DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.claims.iss, "client-key");
        assert_eq!(decoded.claims.sub, "user-42");
        assert_eq!(decoded.claims.aud, vec![MEETUP_AUDIENCE.to_string()]);
        assert_eq!(decoded.claims.exp, (start() + Duration::minutes(10)).timestamp());
    }

    #[test]
    fn test_signed_assertion_with_invalid_key() {
        let config = MeetupAuthConfig::new("http://localhost", "u", "c", "k", b"not a pem".to_vec());
        let handler = MeetupAuthHandler::new(
            config,
            reqwest::Client::new(),
            Arc::new(FixedClock::new(start())),
        );

        assert!(matches!(handler.signed_assertion(start()), Err(AuthError::Signing(_))));
    }

    // ==================== トークン取得 ====================

    #[tokio::test]
    async fn test_fetches_token_with_jwt_bearer_form() {
        let server = TokenServer::new();
        let url = spawn_token_server(server.clone()).await;
        let handler = handler(&url, Arc::new(FixedClock::new(start())));

        let token = handler.access_token().await.unwrap();

        assert_eq!(token, "token-1");
        let forms = server.forms.lock().unwrap();
        let (form, user_agent) = &forms[0];
        assert_eq!(form["grant_type"], JWT_BEARER_GRANT_TYPE);
        assert!(!form["assertion"].is_empty());
        assert_eq!(user_agent.as_deref(), Some(MEETUP_USER_AGENT));
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let server = TokenServer::new();
        let url = spawn_token_server(server.clone()).await;
        let clock = Arc::new(FixedClock::new(start()));
        let handler = handler(&url, clock.clone());

        let first = handler.access_token().await.unwrap();
        clock.advance(Duration::minutes(30));
        let second = handler.access_token().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed() {
        let server = TokenServer::new();
        let url = spawn_token_server(server.clone()).await;
        let clock = Arc::new(FixedClock::new(start()));
        let handler = handler(&url, clock.clone());

        let first = handler.access_token().await.unwrap();
        // 残り29秒
        clock.advance(Duration::seconds(3600 - 29));
        let second = handler.access_token().await.unwrap();

        assert_eq!(first, "token-1");
        assert_eq!(second, "token-2");
        assert_eq!(server.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_trigger_single_fetch() {
        let server = TokenServer {
            delay_ms: 100,
            ..TokenServer::new()
        };
        let url = spawn_token_server(server.clone()).await;
        let handler = Arc::new(handler(&url, Arc::new(FixedClock::new(start()))));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let handler = handler.clone();
            tasks.spawn(async move { handler.access_token().await });
        }

        let mut tokens = Vec::new();
        while let Some(result) = tasks.join_next().await {
            tokens.push(result.unwrap().unwrap());
        }

        assert_eq!(tokens.len(), 16);
        assert!(tokens.iter().all(|t| t == "token-1"));
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_200_status_is_error_and_cache_unchanged() {
        let server = TokenServer {
            status: StatusCode::UNAUTHORIZED,
            ..TokenServer::new()
        };
        let url = spawn_token_server(server.clone()).await;
        let handler = handler(&url, Arc::new(FixedClock::new(start())));

        let err = handler.access_token().await.unwrap_err();

        assert_eq!(err, AuthError::InvalidStatus(401));
        assert!(err.to_string().contains("invalid status code"));
        assert!(handler.token.lock().await.is_none());

        // 再試行はしない: 次の呼び出しで改めて1回だけ取得を試みる
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
        let _ = handler.access_token().await;
        assert_eq!(server.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_token() {
        let clock = Arc::new(FixedClock::new(start()));
        let handler = handler("http://127.0.0.1:1/unreachable", clock.clone());
        let previous = CachedToken {
            access_token: "old".into(),
            expires_at: start() + Duration::seconds(10),
        };
        *handler.token.lock().await = Some(previous.clone());

        let err = handler.access_token().await.unwrap_err();

        assert!(matches!(err, AuthError::Transport(_)));
        assert_eq!(*handler.token.lock().await, Some(previous));
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        async fn bad_json() -> &'static str {
            "{not json"
        }
        let app = Router::new().route("/token", post(bad_json));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let handler = handler(&format!("http://{}/token", addr), Arc::new(FixedClock::new(start())));
        let err = handler.access_token().await.unwrap_err();

        assert!(matches!(err, AuthError::Decode(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_expires_in_is_decode_error() {
        async fn huge_ttl() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "access_token": "tok",
                "expires_in": i64::MAX,
                "token_type": "bearer",
                "refresh_token": "r",
            }))
        }
        let app = Router::new().route("/token", post(huge_ttl));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let handler = handler(&format!("http://{}/token", addr), Arc::new(FixedClock::new(start())));
        let err = handler.access_token().await.unwrap_err();

        assert!(matches!(err, AuthError::Decode(_)));
        assert!(handler.token.lock().await.is_none());
    }
}
