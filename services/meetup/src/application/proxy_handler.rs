/// GraphQLプロキシハンドラー
///
/// `meetup_proxy` Lambdaの本体。ペイロード`{query, variables}`を受け取り、
/// トークンキャッシュを持つGraphQlHandlerでMeetupへ転送してレスポンスJSONをそのまま返す。
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::infrastructure::{GraphQlError, GraphQlHandler, GraphQlRequest};

/// プロキシのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProxyError {
    /// ペイロードが`{query, variables}`の形でない
    #[error("不正なリクエスト: {0}")]
    InvalidRequest(String),

    /// GraphQLの実行に失敗
    #[error(transparent)]
    Query(#[from] GraphQlError),
}

/// GraphQLリクエストを転送するハンドラー
pub struct ProxyHandler<H: GraphQlHandler> {
    handler: H,
}

impl<H: GraphQlHandler> ProxyHandler<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// ペイロードを解析してクエリを実行する
    pub async fn handle(&self, payload: Value) -> Result<Value, ProxyError> {
        let request: GraphQlRequest =
            serde_json::from_value(payload).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        if request.query.trim().is_empty() {
            warn!("空のクエリを受信");
            return Err(ProxyError::InvalidRequest("query is empty".to_string()));
        }

        debug!(query_len = request.query.len(), "GraphQLクエリを転送");
        Ok(self
            .handler
            .execute_query(&request.query, request.variables)
            .await?)
    }
}
