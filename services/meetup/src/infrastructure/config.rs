/// 各コンポーネントの設定
///
/// すべて`ConfigSource`から構築し、必須値の欠落はまとめて報告する。
use super::config_source::{ConfigError, ConfigSource, ensure_present};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::time::Duration;
use tracing::info;

/// Meetup OAuthトークンエンドポイントのデフォルト
pub const DEFAULT_MEETUP_AUTH_URL: &str = "https://secure.meetup.com/oauth2/access";

/// Meetup GraphQLエンドポイントのデフォルト
pub const DEFAULT_MEETUP_API_URL: &str = "https://api.meetup.com/gql";

/// AWS_REGIONが未設定の場合のリージョン
pub const DEFAULT_AWS_REGION: &str = "us-east-2";

/// importerのデフォルトのタイムアウト（秒）
pub const DEFAULT_IMPORT_TIMEOUT_SECS: u64 = 240;

fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

// ============================================================================
// Meetup認証
// ============================================================================

/// JWTベアラーグラントでアクセストークンを取得するための設定
#[derive(Clone)]
pub struct MeetupAuthConfig {
    auth_url: String,
    user_id: String,
    client_key: String,
    signing_key_id: String,
    /// RSA秘密鍵（PEM）
    private_key: Vec<u8>,
}

impl std::fmt::Debug for MeetupAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetupAuthConfig")
            .field("auth_url", &self.auth_url)
            .field("user_id", &self.user_id)
            .field("client_key", &self.client_key)
            .field("signing_key_id", &self.signing_key_id)
            .finish_non_exhaustive()
    }
}

impl MeetupAuthConfig {
    /// 明示的な値で作成（テスト用）
    pub fn new(
        auth_url: impl Into<String>,
        user_id: impl Into<String>,
        client_key: impl Into<String>,
        signing_key_id: impl Into<String>,
        private_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            user_id: user_id.into(),
            client_key: client_key.into(),
            signing_key_id: signing_key_id.into(),
            private_key: private_key.into(),
        }
    }

    /// 設定値から作成
    ///
    /// # 設定キー
    /// - `MEETUP_AUTH_URL`: トークンエンドポイント（デフォルトあり）
    /// - `MEETUP_USER_ID`, `MEETUP_CLIENT_KEY`, `MEETUP_SIGNING_KEY_ID`: 必須
    /// - `MEETUP_PRIVATE_KEY_BASE64`: Base64エンコードされたPEM（必須）
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();

        let auth_url = source.get_or("MEETUP_AUTH_URL", DEFAULT_MEETUP_AUTH_URL);
        let user_id = source.require("MEETUP_USER_ID", &mut missing);
        let client_key = source.require("MEETUP_CLIENT_KEY", &mut missing);
        let signing_key_id = source.require("MEETUP_SIGNING_KEY_ID", &mut missing);
        let private_key_base64 = source.require("MEETUP_PRIVATE_KEY_BASE64", &mut missing);

        ensure_present(missing)?;
        validate_url("MEETUP_AUTH_URL", &auth_url)?;

        let private_key = BASE64
            .decode(private_key_base64.trim())
            .map_err(|e| ConfigError::InvalidValue {
                key: "MEETUP_PRIVATE_KEY_BASE64".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            auth_url,
            user_id,
            client_key,
            signing_key_id,
            private_key,
        })
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    pub fn signing_key_id(&self) -> &str {
        &self.signing_key_id
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

/// Meetup GraphQL APIの接続先
#[derive(Debug, Clone)]
pub struct MeetupApiConfig {
    api_url: String,
}

impl MeetupApiConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }

    /// `MEETUP_API_URL`（デフォルトあり）から作成
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let api_url = source.get_or("MEETUP_API_URL", DEFAULT_MEETUP_API_URL);
        validate_url("MEETUP_API_URL", &api_url)?;
        Ok(Self { api_url })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

// ============================================================================
// DynamoDB
// ============================================================================

/// イベント保存先のテーブル名とインデックス名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTablesConfig {
    events_table: String,
    archived_events_table: String,
    group_date_index: String,
}

impl EventTablesConfig {
    pub fn new(
        events_table: impl Into<String>,
        archived_events_table: impl Into<String>,
        group_date_index: impl Into<String>,
    ) -> Self {
        Self {
            events_table: events_table.into(),
            archived_events_table: archived_events_table.into(),
            group_date_index: group_date_index.into(),
        }
    }

    /// `EVENTS_TABLE_NAME`, `ARCHIVED_EVENTS_TABLE_NAME`, `GROUP_ID_DATE_TIME_INDEX_NAME`から作成
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let events_table = source.require("EVENTS_TABLE_NAME", &mut missing);
        let archived_events_table = source.require("ARCHIVED_EVENTS_TABLE_NAME", &mut missing);
        let group_date_index = source.require("GROUP_ID_DATE_TIME_INDEX_NAME", &mut missing);
        ensure_present(missing)?;

        Ok(Self {
            events_table,
            archived_events_table,
            group_date_index,
        })
    }

    /// イベントテーブル名
    pub fn events_table(&self) -> &str {
        &self.events_table
    }

    /// アーカイブテーブル名
    pub fn archived_events_table(&self) -> &str {
        &self.archived_events_table
    }

    /// GSI（groupId, dateTime）の名前
    pub fn group_date_index(&self) -> &str {
        &self.group_date_index
    }
}

/// AWS SDK設定を読み込む（`AWS_REGION`未設定時は`us-east-2`）
pub async fn load_aws_config() -> aws_config::SdkConfig {
    let region = RegionProviderChain::default_provider().or_else(DEFAULT_AWS_REGION);
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region)
        .load()
        .await
}

/// DynamoDBクライアントを作成する
///
/// `DYNAMODB_ENDPOINT`が設定されていればエンドポイントを上書きする（DynamoDB Local用）。
pub fn dynamodb_client(aws_config: &aws_config::SdkConfig, source: &ConfigSource) -> DynamoDbClient {
    match source.get("DYNAMODB_ENDPOINT") {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "DynamoDBエンドポイントを上書き");
            let config = aws_sdk_dynamodb::config::Builder::from(aws_config)
                .endpoint_url(endpoint)
                .build();
            DynamoDbClient::from_conf(config)
        }
        None => DynamoDbClient::new(aws_config),
    }
}

// ============================================================================
// importer
// ============================================================================

/// 取り込み処理の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImporterConfig {
    group_names: Vec<String>,
    proxy_function_name: Option<String>,
    timeout: Duration,
}

impl ImporterConfig {
    pub fn new(group_names: Vec<String>, proxy_function_name: Option<String>, timeout: Duration) -> Self {
        Self {
            group_names,
            proxy_function_name,
            timeout,
        }
    }

    /// 設定値から作成
    ///
    /// # 設定キー
    /// - `MEETUP_GROUP_NAMES`: カンマ区切りのグループ名（必須）
    /// - `MEETUP_PROXY_FUNCTION_NAME`: 設定時はプロキシLambda経由でMeetupにアクセス
    /// - `IMPORT_TIMEOUT_SECS`: 1回の取り込みの制限時間（デフォルト240秒）
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let raw_groups = source.require("MEETUP_GROUP_NAMES", &mut missing);
        ensure_present(missing)?;

        let group_names = parse_group_names(&raw_groups);
        if group_names.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "MEETUP_GROUP_NAMES".to_string(),
                message: "グループ名が1つもありません".to_string(),
            });
        }

        let timeout_secs = match source.get("IMPORT_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "IMPORT_TIMEOUT_SECS".to_string(),
                message: e.to_string(),
            })?,
            None => DEFAULT_IMPORT_TIMEOUT_SECS,
        };

        Ok(Self {
            group_names,
            proxy_function_name: source.get("MEETUP_PROXY_FUNCTION_NAME"),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }

    pub fn proxy_function_name(&self) -> Option<&str> {
        self.proxy_function_name.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// グループ名を差し替える（ローカル実行の引数指定用）
    pub fn with_group_names(mut self, group_names: Vec<String>) -> Self {
        self.group_names = group_names;
        self
    }
}

/// カンマ区切りのグループ名を分割する（空要素は除外）
pub fn parse_group_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
