// MeetupGraphQlClient - Meetup GraphQL APIクライアント
//
// トークンキャッシュからアクセストークンを取得し、GraphQLクエリをPOSTする。

use super::auth_handler::{AuthError, AuthHandler, MEETUP_USER_AGENT};
use super::config::MeetupApiConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

/// リクエストタイムアウト（秒）
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// 接続タイムアウト（秒）
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// GraphQLリクエストのボディ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub variables: Value,
}

/// GraphQL実行のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphQlError {
    /// アクセストークンの取得に失敗
    #[error("アクセストークンの取得に失敗: {0}")]
    Auth(#[from] AuthError),

    /// クエリが空
    #[error("クエリが空です")]
    EmptyQuery,

    /// ネットワークエラー
    #[error("ネットワークエラー: {0}")]
    NetworkError(String),

    /// 200以外のステータス
    #[error("expected status code 200, got {status}")]
    HttpError {
        /// HTTPステータスコード
        status: u16,
        /// レスポンスボディ
        message: String,
    },

    /// レスポンスのデコードに失敗
    #[error("レスポンスのデコードに失敗: {0}")]
    Decode(String),

    /// プロキシLambdaの実行エラー
    #[error("lambda execution error: {0}")]
    Lambda(String),
}

/// GraphQLクエリを実行するトレイト
#[async_trait]
pub trait GraphQlHandler: Send + Sync {
    /// クエリを実行し、レスポンスJSON（`data`/`errors`を含む）を返す
    async fn execute_query(&self, query: &str, variables: Value) -> Result<Value, GraphQlError>;
}

/// タイムアウト設定済みのHTTPクライアントを作成
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
}

/// Meetup GraphQL APIへ直接アクセスするクライアント
pub struct MeetupGraphQlClient<A: AuthHandler> {
    client: Client,
    api_url: String,
    auth: Arc<A>,
}

impl<A: AuthHandler> std::fmt::Debug for MeetupGraphQlClient<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetupGraphQlClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl<A: AuthHandler> MeetupGraphQlClient<A> {
    /// 新しいMeetupGraphQlClientを作成
    ///
    /// # 引数
    /// * `config` - 接続先
    /// * `client` - HTTPクライアント
    /// * `auth` - トークンキャッシュ（複数の呼び出し元で共有する）
    pub fn new(config: &MeetupApiConfig, client: Client, auth: Arc<A>) -> Self {
        Self {
            client,
            api_url: config.api_url().to_string(),
            auth,
        }
    }
}

#[async_trait]
impl<A: AuthHandler> GraphQlHandler for MeetupGraphQlClient<A> {
    #[instrument(skip(self, query, variables))]
    async fn execute_query(&self, query: &str, variables: Value) -> Result<Value, GraphQlError> {
        if query.trim().is_empty() {
            return Err(GraphQlError::EmptyQuery);
        }

        let token = self.auth.access_token().await?;

        let body = GraphQlRequest {
            query: query.to_string(),
            variables,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, MEETUP_USER_AGENT)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "GraphQLリクエスト失敗");
                GraphQlError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "GraphQLエンドポイントがエラーを返却");
            return Err(GraphQlError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| GraphQlError::Decode(e.to_string()))?;

        debug!("GraphQLレスポンスを受信");
        Ok(value)
    }
}
