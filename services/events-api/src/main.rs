//! Meetupイベント参照用HTTP APIサーバー
//!
//! 本バイナリは以下の機能を提供する:
//! - クライアント認証 (POST /v1/auth, POST /v1/auth/refresh)
//! - グループのイベント一覧 (GET /v1/groups/{groupId}/events)
//! - 次のイベント (GET /v1/groups/{groupId}/events/next)
//! - イベント詳細 (GET /v1/groups/{groupId}/events/{eventId})
//! - ヘルスチェック (GET /health)
//!
//! Lambda上では`lambda_http`経由で、それ以外では`axum::serve`で動作する。

mod auth;
mod config;
mod credentials;
mod error;
mod group_events;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, middleware, routing::get};
use meetup::domain::{Clock, SystemClock};
use meetup::infrastructure::{
    ConfigSource, DynamoKeyedStore, KeyedStore, dynamodb_client, init_logging, load_aws_config,
};
use serde_json::{Value, json};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::{TokenManager, auth_middleware};
use crate::config::ApiConfig;
use crate::credentials::{AuthService, StoreApiUserRepository};
use crate::error::ApiError;
use crate::group_events::{GroupEventsState, StoreGroupEventRepository};

/// アプリケーション状態
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenManager>,
    pub auth_service: Arc<AuthService>,
    pub events: GroupEventsState,
}

impl AppState {
    /// 設定とストアから状態を組み立てる
    ///
    /// # 引数
    /// * `config` - API設定
    /// * `store` - APIユーザーテーブルとイベントテーブルを持つキー付きストア
    /// * `clock` - トークンの有効期限と「今後」の基準時刻
    pub fn new(config: &ApiConfig, store: Arc<dyn KeyedStore>, clock: Arc<dyn Clock>) -> Self {
        let tokens = Arc::new(TokenManager::new(
            config.jwt_secret(),
            config.jwt_issuer(),
            clock.clone(),
        ));
        let users = Arc::new(StoreApiUserRepository::new(
            store.clone(),
            config.api_users_table(),
        ));
        let repository = Arc::new(StoreGroupEventRepository::new(
            store,
            config.events_table(),
            config.group_date_index(),
            clock,
        ));

        Self {
            auth_service: Arc::new(AuthService::new(users, tokens.clone())),
            tokens,
            events: GroupEventsState {
                repository,
                app_url: config.app_url().clone(),
            },
        }
    }
}

/// ヘルスチェックエンドポイント（認証不要）
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

/// ルーターを構築する
///
/// イベント参照ルートにのみ認証ミドルウェアを適用する。
/// TraceLayerによりリクエスト/レスポンスの構造化ログを自動記録する。
pub fn create_router(state: AppState) -> Router {
    let protected = group_events::routes(state.events)
        .route_layer(middleware::from_fn_with_state(state.tokens, auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(credentials::routes(state.auth_service))
        .merge(protected)
        .fallback(not_found)
        // リクエストトレーシングレイヤー（method, path, status, latencyを自動記録）
        .layer(TraceLayer::new_for_http())
}

/// シャットダウンシグナルを待機する
///
/// SIGTERMまたはCtrl+C (SIGINT) を待機し、いずれかを受信したらリターンする。
/// ハンドラーの登録に失敗したシグナルは待機対象から外す。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Ctrl+C シグナルハンドラーの登録に失敗");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM シグナルハンドラーの登録に失敗");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C (SIGINT) を受信しました。graceful shutdownを開始します");
        }
        _ = terminate => {
            info!("SIGTERM を受信しました。graceful shutdownを開始します");
        }
    }
}

/// メイン関数
///
/// # 環境変数
/// - `EVENTS_TABLE_NAME` / `GROUP_ID_DATE_TIME_INDEX_NAME` / `API_USERS_TABLE_NAME` / `JWT_SECRET`（必須）
/// - `JWT_ISSUER` / `APP_URL` / `PORT`: 任意
/// - `SSM_PATH`: 設定時はParameter Storeのパラメータを読み込む
/// - `DYNAMODB_ENDPOINT`: ローカル開発用のDynamoDBエンドポイント
#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    init_logging();

    let source = ConfigSource::from_env_with_ssm().await?;
    let config = ApiConfig::from_source(&source)?;
    info!(config = ?config, "設定を読み込みました");

    let aws_config = load_aws_config().await;
    let store = Arc::new(DynamoKeyedStore::new(dynamodb_client(&aws_config, &source)));
    let app = create_router(AppState::new(&config, store, Arc::new(SystemClock)));

    if std::env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
        info!("Lambda関数として起動");
        return lambda_http::run(app).await;
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "リッスン開始");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("サーバーが正常に停止しました");
    Ok(())
}
