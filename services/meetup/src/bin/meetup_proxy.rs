/// Meetup GraphQLプロキシLambda関数
///
/// `{query, variables}`を受け取り、Meetup GraphQL APIへ転送してレスポンスJSONを返す。
/// アクセストークンはプロセス内でキャッシュし、warm start時は再利用する。
///
/// # 環境変数
/// - MEETUP_USER_ID / MEETUP_CLIENT_KEY / MEETUP_SIGNING_KEY_ID / MEETUP_PRIVATE_KEY_BASE64（必須）
/// - MEETUP_AUTH_URL / MEETUP_API_URL: 接続先（デフォルトあり）
/// - SSM_PATH: 設定時はParameter Storeのパラメータを読み込む
use std::sync::Arc;

use lambda_runtime::{Error, LambdaEvent, service_fn};
use meetup::application::ProxyHandler;
use meetup::domain::SystemClock;
use meetup::infrastructure::{
    ConfigSource, MeetupApiConfig, MeetupAuthConfig, MeetupAuthHandler, MeetupGraphQlClient,
    build_http_client, init_logging,
};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::error;

type Proxy = ProxyHandler<MeetupGraphQlClient<MeetupAuthHandler>>;

/// トークンキャッシュを保持するプロキシの静的インスタンス
static PROXY: OnceCell<Proxy> = OnceCell::const_new();

/// プロキシを取得（初期化されていなければ初期化）
async fn get_proxy() -> Result<&'static Proxy, Error> {
    PROXY
        .get_or_try_init(|| async {
            let source = ConfigSource::from_env_with_ssm().await?;
            let auth_config = MeetupAuthConfig::from_source(&source)?;
            let api_config = MeetupApiConfig::from_source(&source)?;
            let http_client = build_http_client()?;
            let auth = MeetupAuthHandler::new(auth_config, http_client.clone(), Arc::new(SystemClock));
            Ok::<_, Error>(ProxyHandler::new(MeetupGraphQlClient::new(
                &api_config,
                http_client,
                Arc::new(auth),
            )))
        })
        .await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    // Lambda関数を初期化して実行
    let func = service_fn(handler);
    lambda_runtime::run(func).await?;
    Ok(())
}

/// Lambda関数のメインハンドラー
async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let proxy = get_proxy().await.inspect_err(|e| {
        error!(error = %e, "プロキシの初期化に失敗");
    })?;

    match proxy.handle(event.payload).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!(error = %e, "GraphQLクエリの転送に失敗");
            Err(e.into())
        }
    }
}
