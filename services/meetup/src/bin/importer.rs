/// Meetupイベント取り込みLambda関数
///
/// EventBridgeのスケジュールで起動され、設定された全グループのイベントを
/// Meetupから取得してDynamoDBのイベントテーブルと同期する。
/// Lambda関数としても、ローカルスクリプトとしても実行可能。
///
/// # 環境変数
/// - MEETUP_GROUP_NAMES: カンマ区切りのグループurlname（必須）
/// - EVENTS_TABLE_NAME / ARCHIVED_EVENTS_TABLE_NAME / GROUP_ID_DATE_TIME_INDEX_NAME（必須）
/// - MEETUP_PROXY_FUNCTION_NAME: 設定時はプロキシLambda経由でMeetupにアクセス
/// - MEETUP_USER_ID / MEETUP_CLIENT_KEY / MEETUP_SIGNING_KEY_ID / MEETUP_PRIVATE_KEY_BASE64:
///   プロキシを使わない場合に必須
/// - IMPORT_TIMEOUT_SECS: 1回の取り込みの制限時間（デフォルト: 240）
/// - SSM_PATH: 設定時はParameter Storeのパラメータを読み込む
///
/// # ローカル実行
/// ```bash
/// export EVENTS_TABLE_NAME=MeetupEvents
/// export ARCHIVED_EVENTS_TABLE_NAME=MeetupArchivedEvents
/// export GROUP_ID_DATE_TIME_INDEX_NAME=GroupIdDateTimeIndex
/// export MEETUP_GROUP_NAMES=sgfdevs,springfield-rust
///
/// # 全グループ
/// cargo run --bin importer
///
/// # グループ指定
/// cargo run --bin importer -- --group sgfdevs
/// ```
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lambda_runtime::{Error, LambdaEvent, service_fn};
use meetup::application::{ImportService, ImportSummary};
use meetup::domain::{Clock, SystemClock};
use meetup::infrastructure::{
    ConfigSource, DynamoKeyedStore, EventTablesConfig, GraphQlHandler, GraphQlMeetupRepository,
    ImporterConfig, LambdaProxyGraphQlHandler, MeetupApiConfig, MeetupAuthConfig,
    MeetupAuthHandler, MeetupGraphQlClient, StoreEventRepository, build_http_client,
    dynamodb_client, init_logging, load_aws_config,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, info};

type Importer = ImportService<StoreEventRepository, GraphQlMeetupRepository>;

/// コマンドライン引数（ローカル実行用）
#[derive(Parser, Debug)]
#[command(name = "importer")]
#[command(about = "MeetupのイベントをDynamoDBに取り込む")]
struct CliArgs {
    /// 対象グループ（複数指定可）。MEETUP_GROUP_NAMESより優先される
    #[arg(long, short = 'g')]
    group: Vec<String>,
}

/// 取り込み結果（Lambdaの戻り値）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportOutput {
    succeeded: Vec<String>,
    failed: Vec<String>,
}

impl From<ImportSummary> for ImportOutput {
    fn from(summary: ImportSummary) -> Self {
        Self {
            succeeded: summary.succeeded.into_iter().map(|g| g.group).collect(),
            failed: summary.failed,
        }
    }
}

/// Lambda warm start時に再利用する取り込みサービス
///
/// トークンキャッシュとAWSクライアントはプロセス内で共有する。
static IMPORTER: OnceCell<(Importer, Duration)> = OnceCell::const_new();

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    // Lambda環境かどうかを判定
    if std::env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
        info!("Lambda関数として起動");
        let func = service_fn(handler);
        lambda_runtime::run(func).await?;
    } else {
        info!("ローカルスクリプトとして起動");
        run_local().await?;
    }

    Ok(())
}

/// Lambda関数のメインハンドラー
///
/// スケジュールイベントのペイロードは使用しない。
async fn handler(_event: LambdaEvent<Value>) -> Result<ImportOutput, Error> {
    let (importer, timeout) = IMPORTER
        .get_or_try_init(|| async {
            let source = ConfigSource::from_env_with_ssm().await?;
            build_importer(&source).await
        })
        .await
        .inspect_err(|e| error!(error = %e, "取り込みサービスの初期化に失敗"))?;

    let summary = run_with_deadline(importer, *timeout).await?;
    Ok(summary.into())
}

/// ローカル実行用関数
async fn run_local() -> Result<(), Error> {
    let args = CliArgs::parse();

    let mut source = ConfigSource::from_env_with_ssm().await?;
    if !args.group.is_empty() {
        info!(groups = ?args.group, "コマンドライン引数のグループを使用");
        source = source.with_override("MEETUP_GROUP_NAMES", args.group.join(","));
    }

    let (importer, timeout) = build_importer(&source).await?;
    let summary = run_with_deadline(&importer, timeout).await?;

    for group in &summary.succeeded {
        info!(
            group = %group.group,
            events_in_db = group.events_in_db,
            events_from_meetup = group.events_from_meetup,
            archived_events = group.archived_events,
            "結果"
        );
    }
    if !summary.failed.is_empty() {
        error!(failed = ?summary.failed, "一部のグループの取り込みに失敗");
    }
    Ok(())
}

/// 制限時間付きで取り込みを実行
async fn run_with_deadline(importer: &Importer, timeout: Duration) -> Result<ImportSummary, Error> {
    match tokio::time::timeout(timeout, importer.import()).await {
        Ok(summary) => Ok(summary),
        Err(_) => {
            error!(
                timeout_secs = timeout.as_secs(),
                groups = importer.group_names().len(),
                "取り込みが制限時間内に完了しなかった"
            );
            Err(format!("import did not finish within {} seconds", timeout.as_secs()).into())
        }
    }
}

/// 設定から取り込みサービスを組み立てる
async fn build_importer(source: &ConfigSource) -> Result<(Importer, Duration), Error> {
    let importer_config = ImporterConfig::from_source(source)?;
    let tables = EventTablesConfig::from_source(source)?;
    let aws_config = load_aws_config().await;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let graphql: Arc<dyn GraphQlHandler> = match importer_config.proxy_function_name() {
        Some(function_name) => {
            info!(function_name = %function_name, "プロキシLambda経由でMeetupにアクセス");
            Arc::new(LambdaProxyGraphQlHandler::from_sdk_config(&aws_config, function_name))
        }
        None => {
            info!("Meetup APIに直接アクセス");
            let auth_config = MeetupAuthConfig::from_source(source)?;
            let api_config = MeetupApiConfig::from_source(source)?;
            let http_client = build_http_client()?;
            let auth = Arc::new(MeetupAuthHandler::new(auth_config, http_client.clone(), clock.clone()));
            Arc::new(MeetupGraphQlClient::new(&api_config, http_client, auth))
        }
    };

    let store = Arc::new(DynamoKeyedStore::new(dynamodb_client(&aws_config, source)));
    let event_repo = Arc::new(StoreEventRepository::new(store, tables, clock.clone()));
    let meetup_repo = Arc::new(GraphQlMeetupRepository::new(graphql));

    info!(
        groups = ?importer_config.group_names(),
        timeout_secs = importer_config.timeout().as_secs(),
        "取り込みサービスを初期化"
    );

    let service = ImportService::new(
        importer_config.group_names().to_vec(),
        clock,
        event_repo,
        meetup_repo,
    );
    Ok((service, importer_config.timeout()))
}
