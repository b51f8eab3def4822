/// キー付きストアでMeetupイベントを管理するイベントリポジトリ
///
/// - 今後のイベント取得: GSI（groupId, dateTime）で`dateTime > 現在時刻`を全ページ取得
/// - upsert: IDによる全体上書き。`MAX_BATCH_SIZE`件ごとに逐次バッチ書き込み
/// - アーカイブ: ライブテーブルから読み出してアーカイブテーブルへ書き込み、ライブテーブルから削除
use crate::domain::{Clock, Event, format_store_datetime};
use crate::infrastructure::config::EventTablesConfig;
use crate::infrastructure::keyed_store::{
    Item, KeyQuery, KeyedStore, MAX_BATCH_SIZE, SortKeyCondition, StoreError, WriteOperation,
    batch_get_all, batch_write_all, query_all, string_key,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// イベントのハッシュキー属性
pub const EVENT_ID_ATTRIBUTE: &str = "id";

/// GSIのパーティション属性
pub const GROUP_ID_ATTRIBUTE: &str = "groupId";

/// GSIのソート属性
pub const DATE_TIME_ATTRIBUTE: &str = "dateTime";

/// イベントリポジトリ操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EventRepositoryError {
    /// 書き込み失敗
    #[error("Write error: {0}")]
    WriteError(String),

    /// 読み込み失敗
    #[error("Read error: {0}")]
    ReadError(String),

    /// アイテムとEventの変換失敗
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<StoreError> for EventRepositoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ReadError(msg) => EventRepositoryError::ReadError(msg),
            other => EventRepositoryError::WriteError(other.to_string()),
        }
    }
}

/// イベント永続化用トレイト
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// グループの今後のイベント（`dateTime > 現在時刻`）をすべて取得
    async fn upcoming_events_for_group(&self, group: &str) -> Result<Vec<Event>, EventRepositoryError>;

    /// イベントをIDで全体上書きする。空の場合は何もしない
    async fn upsert_events(&self, events: &[Event]) -> Result<(), EventRepositoryError>;

    /// イベントをアーカイブテーブルへ移動する。存在しないIDは無視する
    async fn archive_events(&self, event_ids: &[String]) -> Result<(), EventRepositoryError>;
}

/// EventRepositoryのKeyedStore実装
pub struct StoreEventRepository {
    store: Arc<dyn KeyedStore>,
    tables: EventTablesConfig,
    clock: Arc<dyn Clock>,
}

impl StoreEventRepository {
    /// 新しいStoreEventRepositoryを作成
    ///
    /// # 引数
    /// * `store` - キー付きストア
    /// * `tables` - テーブル名とインデックス名
    /// * `clock` - 「今後」の基準時刻
    pub fn new(store: Arc<dyn KeyedStore>, tables: EventTablesConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            tables,
            clock,
        }
    }

    fn to_item(event: &Event) -> Result<Item, EventRepositoryError> {
        serde_dynamo::to_item(event).map_err(|e| EventRepositoryError::SerializationError(e.to_string()))
    }

    fn from_item(item: Item) -> Result<Event, EventRepositoryError> {
        serde_dynamo::from_item(item).map_err(|e| EventRepositoryError::SerializationError(e.to_string()))
    }
}

#[async_trait]
impl EventRepository for StoreEventRepository {
    #[instrument(skip(self))]
    async fn upcoming_events_for_group(&self, group: &str) -> Result<Vec<Event>, EventRepositoryError> {
        let now = format_store_datetime(&self.clock.now());

        let query = KeyQuery::partition(self.tables.events_table(), GROUP_ID_ATTRIBUTE, group)
            .index(self.tables.group_date_index())
            .sort(DATE_TIME_ATTRIBUTE, SortKeyCondition::GreaterThan(now));

        let items = query_all(self.store.as_ref(), &query).await?;
        let events = items
            .into_iter()
            .map(Self::from_item)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = events.len(), "保存済みの今後のイベントを取得");
        Ok(events)
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn upsert_events(&self, events: &[Event]) -> Result<(), EventRepositoryError> {
        if events.is_empty() {
            return Ok(());
        }

        for chunk in events.chunks(MAX_BATCH_SIZE) {
            let writes = chunk
                .iter()
                .map(|event| Self::to_item(event).map(WriteOperation::Put))
                .collect::<Result<Vec<_>, _>>()?;

            batch_write_all(self.store.as_ref(), self.tables.events_table(), writes).await?;
        }

        info!(count = events.len(), "イベントをupsert");
        Ok(())
    }

    #[instrument(skip(self, event_ids), fields(count = event_ids.len()))]
    async fn archive_events(&self, event_ids: &[String]) -> Result<(), EventRepositoryError> {
        if event_ids.is_empty() {
            return Ok(());
        }

        let mut archived = 0;
        for chunk in event_ids.chunks(MAX_BATCH_SIZE) {
            let keys: Vec<Item> = chunk
                .iter()
                .map(|id| string_key(EVENT_ID_ATTRIBUTE, id.as_str()))
                .collect();

            let existing =
                batch_get_all(self.store.as_ref(), self.tables.events_table(), keys).await?;
            if existing.is_empty() {
                debug!(requested = chunk.len(), "アーカイブ対象がライブテーブルに存在しない");
                continue;
            }

            // 実在するアイテムのみ削除する
            let found_keys: Vec<Item> = existing
                .iter()
                .filter_map(|item| item.get(EVENT_ID_ATTRIBUTE).cloned())
                .map(|id| Item::from([(EVENT_ID_ATTRIBUTE.to_string(), id)]))
                .collect();
            archived += existing.len();

            let puts = existing.into_iter().map(WriteOperation::Put).collect();
            batch_write_all(
                self.store.as_ref(),
                self.tables.archived_events_table(),
                puts,
            )
            .await?;

            let deletes = found_keys.into_iter().map(WriteOperation::Delete).collect();
            batch_write_all(self.store.as_ref(), self.tables.events_table(), deletes).await?;
        }

        info!(requested = event_ids.len(), archived, "イベントをアーカイブ");
        Ok(())
    }
}
