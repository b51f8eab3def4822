// アプリケーション層モジュール
pub mod import_service;
pub mod proxy_handler;

// 再エクスポート
pub use import_service::{GroupImport, ImportError, ImportService, ImportSummary};
pub use proxy_handler::{ProxyError, ProxyHandler};
