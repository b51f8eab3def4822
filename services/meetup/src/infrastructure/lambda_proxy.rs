//! プロキシLambda経由のGraphQL実行
//!
//! importerから直接Meetupへアクセスせず、トークンキャッシュを持つ`meetup_proxy`
//! Lambdaを同期呼び出しする。ペイロードは`{query, variables}`。

use super::graphql::{GraphQlError, GraphQlHandler, GraphQlRequest};
use async_trait::async_trait;
use aws_sdk_lambda::Client as LambdaClient;
use aws_sdk_lambda::primitives::Blob;
use serde_json::Value;
use tracing::{error, instrument};

/// Lambda関数の同期呼び出し結果
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutput {
    /// 関数がエラーで終了した場合の種別（`Unhandled`など）
    pub function_error: Option<String>,
    pub payload: Vec<u8>,
}

/// Lambda呼び出しトレイト（テスト用の抽象化）
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<InvocationOutput, GraphQlError>;
}

/// 実際のAWS Lambda SDKを使用した呼び出し実装
pub struct AwsFunctionInvoker {
    client: LambdaClient,
}

impl AwsFunctionInvoker {
    pub fn new(client: LambdaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FunctionInvoker for AwsFunctionInvoker {
    async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<InvocationOutput, GraphQlError> {
        let output = self
            .client
            .invoke()
            .function_name(function_name)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| GraphQlError::NetworkError(e.into_service_error().to_string()))?;

        Ok(InvocationOutput {
            function_error: output.function_error,
            payload: output.payload.map(Blob::into_inner).unwrap_or_default(),
        })
    }
}

/// プロキシLambdaを呼び出すGraphQlHandler実装
pub struct LambdaProxyGraphQlHandler<I: FunctionInvoker> {
    invoker: I,
    function_name: String,
}

impl<I: FunctionInvoker> LambdaProxyGraphQlHandler<I> {
    pub fn new(invoker: I, function_name: impl Into<String>) -> Self {
        Self {
            invoker,
            function_name: function_name.into(),
        }
    }
}

impl LambdaProxyGraphQlHandler<AwsFunctionInvoker> {
    /// SDK設定からハンドラーを作成
    pub fn from_sdk_config(config: &aws_config::SdkConfig, function_name: impl Into<String>) -> Self {
        Self::new(AwsFunctionInvoker::new(LambdaClient::new(config)), function_name)
    }
}

#[async_trait]
impl<I: FunctionInvoker> GraphQlHandler for LambdaProxyGraphQlHandler<I> {
    #[instrument(skip(self, query, variables), fields(function_name = %self.function_name))]
    async fn execute_query(&self, query: &str, variables: Value) -> Result<Value, GraphQlError> {
        let request = GraphQlRequest {
            query: query.to_string(),
            variables,
        };
        let payload = serde_json::to_vec(&request).map_err(|e| GraphQlError::Decode(e.to_string()))?;

        let output = self.invoker.invoke(&self.function_name, payload).await?;

        if let Some(function_error) = output.function_error {
            let detail = String::from_utf8_lossy(&output.payload).to_string();
            error!(function_error = %function_error, payload = %detail, "プロキシLambdaがエラーを返却");
            return Err(GraphQlError::Lambda(format!("{}: {}", function_error, detail)));
        }

        serde_json::from_slice(&output.payload).map_err(|e| GraphQlError::Decode(e.to_string()))
    }
}
