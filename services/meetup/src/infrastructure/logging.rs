/// ログ基盤モジュール
///
/// Lambda環境向けの構造化ログ設定を提供する。
/// tracingクレートを使用し、JSON形式とテキスト形式を`LOG_TYPE`で切り替える。
use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// ログサブスクライバー初期化用の同期プリミティブ
static INIT: Once = Once::new();

/// ログ出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// CloudWatch向けのフラットなJSON
    Json,
    /// ローカル実行向けの人間が読みやすい形式
    Text,
}

impl LogFormat {
    /// `LOG_TYPE`の値から形式を決定する（`text`以外はJSON）
    pub fn from_log_type(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "text" => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

/// フィルター文字列を決定する
///
/// 優先順位: `RUST_LOG` > `LOG_LEVEL` > `info`
fn filter_directive(rust_log: Option<String>, log_level: Option<String>) -> String {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .or_else(|| log_level.filter(|v| !v.trim().is_empty()))
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "info".to_string())
}

/// ログサブスクライバーを初期化する
///
/// この関数は複数回呼び出しても安全で、最初の呼び出しのみ初期化を実行する。
///
/// # 使用例
/// ```ignore
/// use meetup::infrastructure::init_logging;
///
/// init_logging();
/// tracing::info!("Lambda function started");
/// ```
pub fn init_logging() {
    INIT.call_once(|| {
        let directive = filter_directive(
            std::env::var("RUST_LOG").ok(),
            std::env::var("LOG_LEVEL").ok(),
        );
        let env_filter =
            EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

        let format = LogFormat::from_log_type(std::env::var("LOG_TYPE").ok().as_deref());

        match format {
            LogFormat::Json => {
                // JSON形式のログレイヤー（Lambda/CloudWatch向け）
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .flatten_event(true)
                    .with_current_span(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .init();
            }
            LogFormat::Text => {
                let text_layer = tracing_subscriber::fmt::layer().with_target(true).compact();

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(text_layer)
                    .init();
            }
        }
    });
}

/// テスト用のログサブスクライバーを初期化する（人間が読みやすい形式）
#[cfg(test)]
pub fn init_test_logging() {
    static TEST_INIT: Once = Once::new();

    TEST_INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
    });
}
