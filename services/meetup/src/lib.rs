//! Meetupイベントの取り込み
//!
//! Meetup GraphQL APIからグループのイベントを取得し、DynamoDBのイベントテーブルと同期する。

// Domain layer modules
pub mod domain;

// Application layer modules
pub mod application;

// Infrastructure layer modules
pub mod infrastructure;
