//! API設定
//!
//! 環境変数（`SSM_PATH`設定時はParameter Storeの値で上書き）から読み込む。

use meetup::infrastructure::{ConfigError, ConfigSource};
use meetup::infrastructure::config_source::ensure_present;
use url::Url;

/// JWTの発行者（デフォルト）
pub const DEFAULT_JWT_ISSUER: &str = "meetup-events-api";

/// 次ページURLの基準（デフォルト）
pub const DEFAULT_APP_URL: &str = "http://localhost:8080";

/// ローカル実行時の待ち受けポート（デフォルト）
pub const DEFAULT_PORT: u16 = 8080;

/// API設定
#[derive(Clone)]
pub struct ApiConfig {
    events_table: String,
    group_date_index: String,
    api_users_table: String,
    jwt_secret: Vec<u8>,
    jwt_issuer: String,
    app_url: Url,
    port: u16,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("events_table", &self.events_table)
            .field("group_date_index", &self.group_date_index)
            .field("api_users_table", &self.api_users_table)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("app_url", &self.app_url.as_str())
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl ApiConfig {
    /// 設定値から作成
    ///
    /// # 設定キー
    /// - `EVENTS_TABLE_NAME`, `GROUP_ID_DATE_TIME_INDEX_NAME`, `API_USERS_TABLE_NAME`, `JWT_SECRET`: 必須
    /// - `JWT_ISSUER`, `APP_URL`, `PORT`: 任意
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let events_table = source.require("EVENTS_TABLE_NAME", &mut missing);
        let group_date_index = source.require("GROUP_ID_DATE_TIME_INDEX_NAME", &mut missing);
        let api_users_table = source.require("API_USERS_TABLE_NAME", &mut missing);
        let jwt_secret = source.require("JWT_SECRET", &mut missing);
        ensure_present(missing)?;

        let raw_app_url = source.get_or("APP_URL", DEFAULT_APP_URL);
        let app_url = Url::parse(&raw_app_url).map_err(|e| ConfigError::InvalidValue {
            key: "APP_URL".to_string(),
            message: e.to_string(),
        })?;

        let port = match source.get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "PORT".to_string(),
                message: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            events_table,
            group_date_index,
            api_users_table,
            jwt_secret: jwt_secret.into_bytes(),
            jwt_issuer: source.get_or("JWT_ISSUER", DEFAULT_JWT_ISSUER),
            app_url,
            port,
        })
    }

    pub fn events_table(&self) -> &str {
        &self.events_table
    }

    pub fn group_date_index(&self) -> &str {
        &self.group_date_index
    }

    pub fn api_users_table(&self) -> &str {
        &self.api_users_table
    }

    pub fn jwt_secret(&self) -> &[u8] {
        &self.jwt_secret
    }

    pub fn jwt_issuer(&self) -> &str {
        &self.jwt_issuer
    }

    pub fn app_url(&self) -> &Url {
        &self.app_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("EVENTS_TABLE_NAME", "MeetupEvents"),
            ("GROUP_ID_DATE_TIME_INDEX_NAME", "GroupIdDateTimeIndex"),
            ("API_USERS_TABLE_NAME", "ApiUsers"),
            ("JWT_SECRET", "s3cret"),
        ]
    }

    #[test]
    fn test_defaults() {
        let config = ApiConfig::from_source(&ConfigSource::from_map(required())).unwrap();

        assert_eq!(config.events_table(), "MeetupEvents");
        assert_eq!(config.group_date_index(), "GroupIdDateTimeIndex");
        assert_eq!(config.api_users_table(), "ApiUsers");
        assert_eq!(config.jwt_secret(), b"s3cret");
        assert_eq!(config.jwt_issuer(), DEFAULT_JWT_ISSUER);
        assert_eq!(config.app_url().as_str(), "http://localhost:8080/");
        assert_eq!(config.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_overrides() {
        let mut values = required();
        values.push(("JWT_ISSUER", "meetup-api.example.org"));
        values.push(("APP_URL", "https://meetup-api.example.org"));
        values.push(("PORT", "3000"));

        let config = ApiConfig::from_source(&ConfigSource::from_map(values)).unwrap();

        assert_eq!(config.jwt_issuer(), "meetup-api.example.org");
        assert_eq!(config.app_url().host_str(), Some("meetup-api.example.org"));
        assert_eq!(config.port(), 3000);
    }

    #[test]
    fn test_reports_all_missing_keys() {
        let err = ApiConfig::from_source(&ConfigSource::from_map([("JWT_SECRET", "x")])).unwrap_err();

        assert_eq!(
            err,
            ConfigError::MissingKeys(vec![
                "EVENTS_TABLE_NAME".into(),
                "GROUP_ID_DATE_TIME_INDEX_NAME".into(),
                "API_USERS_TABLE_NAME".into(),
            ])
        );
    }

    #[test]
    fn test_invalid_port() {
        let mut values = required();
        values.push(("PORT", "eighty"));

        let err = ApiConfig::from_source(&ConfigSource::from_map(values)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "PORT"));
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = ApiConfig::from_source(&ConfigSource::from_map(required())).unwrap();
        assert!(!format!("{:?}", config).contains("s3cret"));
    }
}
