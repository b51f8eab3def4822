//! 設定値の取得元
//!
//! プロセスの環境変数と、SSM Parameter Storeから読み込んだパラメータを統合する。
//! 同じキーが両方にある場合はSSMの値が優先される。

use async_trait::async_trait;
use aws_sdk_ssm::Client as SsmClient;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// SSMパラメータを読み込むパスを指定する環境変数
pub const SSM_PATH_ENV: &str = "SSM_PATH";

/// 設定読み込みのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// 必須の設定値が欠落（欠落したキーをすべて列挙する）
    #[error("必須の設定値が設定されていません: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    /// 設定値の形式が不正
    #[error("設定値が不正です: {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// SSM APIエラー
    #[error("AWS SSM APIエラー: {0}")]
    Ssm(String),
}

/// パラメータストアの抽象化（テスト用）
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// パス配下のパラメータを「キー名 -> 値」で取得する
    ///
    /// キー名はパラメータ名の最後のセグメントを大文字化したもの
    /// （例: `/meetup/prod/meetup-client-key` -> `MEETUP_CLIENT_KEY`）。
    async fn parameters_by_path(&self, path: &str) -> Result<HashMap<String, String>, ConfigError>;
}

/// AWS SSM SDKを使用したパラメータストア実装
pub struct AwsParameterStore {
    client: SsmClient,
}

impl AwsParameterStore {
    pub fn new(client: SsmClient) -> Self {
        Self { client }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(SsmClient::new(&config))
    }
}

/// パラメータ名を設定キーに変換する
pub fn parameter_key(name: &str) -> String {
    name.rsplit('/')
        .next()
        .unwrap_or(name)
        .replace('-', "_")
        .to_ascii_uppercase()
}

#[async_trait]
impl ParameterStore for AwsParameterStore {
    async fn parameters_by_path(&self, path: &str) -> Result<HashMap<String, String>, ConfigError> {
        let mut parameters = HashMap::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .get_parameters_by_path()
                .path(path)
                .recursive(true)
                .with_decryption(true)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| ConfigError::Ssm(e.into_service_error().to_string()))?;

            for parameter in output.parameters() {
                if let (Some(name), Some(value)) = (parameter.name(), parameter.value()) {
                    parameters.insert(parameter_key(name), value.to_string());
                }
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(path = %path, count = parameters.len(), "SSMパラメータを取得");
        Ok(parameters)
    }
}

/// 環境変数とSSMパラメータを統合した設定値の取得元
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    /// SSMなどから読み込んだ値（環境変数より優先）
    overrides: HashMap<String, String>,
    /// 環境変数を参照するかどうか
    read_env: bool,
}

impl ConfigSource {
    /// 環境変数のみを参照する
    pub fn from_env() -> Self {
        Self {
            overrides: HashMap::new(),
            read_env: true,
        }
    }

    /// 指定した値のみを参照する（テスト用）
    pub fn from_map<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            overrides: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            read_env: false,
        }
    }

    /// 環境変数に加え、`SSM_PATH`が設定されていればSSMのパラメータを読み込む
    pub async fn from_env_with_ssm() -> Result<Self, ConfigError> {
        let source = Self::from_env();
        match source.get(SSM_PATH_ENV) {
            Some(path) => {
                let store = AwsParameterStore::from_config().await;
                source.with_parameters(&store, &path).await
            }
            None => Ok(source),
        }
    }

    /// パラメータストアの値を上書きとして取り込む
    pub async fn with_parameters(
        mut self,
        store: &dyn ParameterStore,
        path: &str,
    ) -> Result<Self, ConfigError> {
        let parameters = store.parameters_by_path(path).await?;
        info!(path = %path, count = parameters.len(), "SSMパラメータを設定に反映");
        self.overrides.extend(parameters);
        Ok(self)
    }

    /// 値を1つ上書きする（コマンドライン引数など）
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// 値を取得する（空文字列は未設定として扱う）
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match self.overrides.get(key) {
            Some(v) => Some(v.clone()),
            None if self.read_env => std::env::var(key).ok(),
            None => None,
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// 値を取得し、未設定ならデフォルト値を返す
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// 必須値を取得する。未設定の場合は`missing`にキーを追加して空文字列を返す
    pub fn require(&self, key: &str, missing: &mut Vec<String>) -> String {
        match self.get(key) {
            Some(v) => v,
            None => {
                missing.push(key.to_string());
                String::new()
            }
        }
    }
}

/// 欠落キーがあればエラーにする
pub fn ensure_present(missing: Vec<String>) -> Result<(), ConfigError> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingKeys(missing))
    }
}
