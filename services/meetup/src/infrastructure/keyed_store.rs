//! キー付きストアの抽象化
//!
//! DynamoDBのQuery/GetItem/BatchGetItem/BatchWriteItemを、テーブル+インデックス単位の
//! 汎用インターフェースとして扱う。バッチ操作は「未処理分」を返し得るため、
//! 呼び出し側は`batch_write_all`/`batch_get_all`で収束するまで再送する。

use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::{
    AttributeValue, DeleteRequest, KeysAndAttributes, PutRequest, WriteRequest,
};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// ストアの1アイテム
pub type Item = HashMap<String, AttributeValue>;

/// BatchWriteItemの1リクエストあたりの最大件数
pub const MAX_BATCH_SIZE: usize = 25;

/// BatchGetItemの1リクエストあたりの最大件数
pub const MAX_BATCH_GET_SIZE: usize = 100;

/// 未処理分の再送回数の上限
const MAX_UNPROCESSED_ATTEMPTS: u32 = 8;

/// 未処理分の再送の初回待機時間（ミリ秒、以降倍々）
const UNPROCESSED_BACKOFF_BASE_MS: u64 = 25;

/// ストア操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// 読み込み失敗
    #[error("Read error: {0}")]
    ReadError(String),

    /// 書き込み失敗
    #[error("Write error: {0}")]
    WriteError(String),

    /// リクエストの組み立て失敗（件数超過など）
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 未処理分が再送上限までに解消しなかった
    #[error("Unprocessed items remain after {attempts} attempts: {remaining} items")]
    UnprocessedItems { attempts: u32, remaining: usize },
}

/// ソートキーの条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKeyCondition {
    GreaterThan(String),
    LessThan(String),
    /// 両端を含む
    Between(String, String),
}

/// パーティションキー（+ソートキー条件）による範囲検索
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyQuery {
    pub table: String,
    pub index: Option<String>,
    pub partition_attribute: String,
    pub partition_value: String,
    pub sort: Option<(String, SortKeyCondition)>,
    pub limit: Option<i32>,
}

impl KeyQuery {
    /// テーブル（またはインデックス）に対するパーティション検索を作成
    pub fn partition(
        table: impl Into<String>,
        partition_attribute: impl Into<String>,
        partition_value: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            index: None,
            partition_attribute: partition_attribute.into(),
            partition_value: partition_value.into(),
            sort: None,
            limit: None,
        }
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn sort(mut self, attribute: impl Into<String>, condition: SortKeyCondition) -> Self {
        self.sort = Some((attribute.into(), condition));
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// 検索結果の1ページ
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// 続きがある場合の再開キー
    pub last_evaluated_key: Option<Item>,
}

/// BatchGetの結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetPage {
    pub items: Vec<Item>,
    pub unprocessed_keys: Vec<Item>,
}

/// バッチ書き込みの1操作
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// アイテム全体の上書き
    Put(Item),
    /// キーによる削除
    Delete(Item),
}

/// キー付きストアのトレイト
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// 1ページ分を検索する
    async fn query(
        &self,
        query: &KeyQuery,
        exclusive_start_key: Option<Item>,
    ) -> Result<QueryPage, StoreError>;

    /// キーで1件取得する
    async fn get_item(&self, table: &str, key: Item) -> Result<Option<Item>, StoreError>;

    /// キーで複数件取得する（最大`MAX_BATCH_GET_SIZE`件）
    async fn batch_get(&self, table: &str, keys: Vec<Item>) -> Result<BatchGetPage, StoreError>;

    /// 複数件を書き込む（最大`MAX_BATCH_SIZE`件）。未処理分を返す
    async fn batch_write(
        &self,
        table: &str,
        writes: Vec<WriteOperation>,
    ) -> Result<Vec<WriteOperation>, StoreError>;
}

/// 全ページを読み切る
pub async fn query_all<S>(store: &S, query: &KeyQuery) -> Result<Vec<Item>, StoreError>
where
    S: KeyedStore + ?Sized,
{
    let mut items = Vec::new();
    let mut last_evaluated_key = None;

    // ページネーション: LastEvaluatedKeyがある限り検索を続ける
    loop {
        let page = store.query(query, last_evaluated_key.take()).await?;
        items.extend(page.items);

        match page.last_evaluated_key {
            Some(key) => last_evaluated_key = Some(key),
            None => break,
        }
    }

    Ok(items)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(UNPROCESSED_BACKOFF_BASE_MS << attempt.min(6))
}

/// 未処理分がなくなるまで書き込む
///
/// 呼び出し側で`MAX_BATCH_SIZE`以下にチャンク化しておくこと。
pub async fn batch_write_all<S>(
    store: &S,
    table: &str,
    writes: Vec<WriteOperation>,
) -> Result<(), StoreError>
where
    S: KeyedStore + ?Sized,
{
    let mut pending = writes;
    let mut attempt = 0;

    while !pending.is_empty() {
        if attempt >= MAX_UNPROCESSED_ATTEMPTS {
            return Err(StoreError::UnprocessedItems {
                attempts: attempt,
                remaining: pending.len(),
            });
        }
        if attempt > 0 {
            warn!(table = %table, remaining = pending.len(), attempt, "未処理の書き込みを再送");
            tokio::time::sleep(backoff(attempt)).await;
        }

        pending = store.batch_write(table, pending).await?;
        attempt += 1;
    }

    Ok(())
}

/// 未処理分がなくなるまで取得する
pub async fn batch_get_all<S>(store: &S, table: &str, keys: Vec<Item>) -> Result<Vec<Item>, StoreError>
where
    S: KeyedStore + ?Sized,
{
    let mut items = Vec::new();
    let mut pending = keys;
    let mut attempt = 0;

    while !pending.is_empty() {
        if attempt >= MAX_UNPROCESSED_ATTEMPTS {
            return Err(StoreError::UnprocessedItems {
                attempts: attempt,
                remaining: pending.len(),
            });
        }
        if attempt > 0 {
            warn!(table = %table, remaining = pending.len(), attempt, "未処理のキーを再取得");
            tokio::time::sleep(backoff(attempt)).await;
        }

        let page = store.batch_get(table, pending).await?;
        items.extend(page.items);
        pending = page.unprocessed_keys;
        attempt += 1;
    }

    Ok(items)
}

/// 文字列属性1つからなるキーを作成
pub fn string_key(attribute: &str, value: impl Into<String>) -> Item {
    HashMap::from([(attribute.to_string(), AttributeValue::S(value.into()))])
}

// ============================================================================
// DynamoDB実装
// ============================================================================

/// KeyedStoreのDynamoDB実装
#[derive(Debug, Clone)]
pub struct DynamoKeyedStore {
    client: DynamoDbClient,
}

impl DynamoKeyedStore {
    pub fn new(client: DynamoDbClient) -> Self {
        Self { client }
    }

    /// キー条件式と属性名/値を組み立てる
    fn key_condition(
        query: &KeyQuery,
    ) -> (String, HashMap<String, String>, HashMap<String, AttributeValue>) {
        let mut names = HashMap::from([("#pk".to_string(), query.partition_attribute.clone())]);
        let mut values = HashMap::from([(
            ":pk".to_string(),
            AttributeValue::S(query.partition_value.clone()),
        )]);
        let mut expression = "#pk = :pk".to_string();

        if let Some((attribute, condition)) = &query.sort {
            names.insert("#sk".to_string(), attribute.clone());
            match condition {
                SortKeyCondition::GreaterThan(v) => {
                    expression.push_str(" AND #sk > :sk");
                    values.insert(":sk".to_string(), AttributeValue::S(v.clone()));
                }
                SortKeyCondition::LessThan(v) => {
                    expression.push_str(" AND #sk < :sk");
                    values.insert(":sk".to_string(), AttributeValue::S(v.clone()));
                }
                SortKeyCondition::Between(from, to) => {
                    expression.push_str(" AND #sk BETWEEN :sk_from AND :sk_to");
                    values.insert(":sk_from".to_string(), AttributeValue::S(from.clone()));
                    values.insert(":sk_to".to_string(), AttributeValue::S(to.clone()));
                }
            }
        }

        (expression, names, values)
    }

    fn to_write_request(write: WriteOperation) -> Result<WriteRequest, StoreError> {
        let request = match write {
            WriteOperation::Put(item) => WriteRequest::builder()
                .put_request(
                    PutRequest::builder()
                        .set_item(Some(item))
                        .build()
                        .map_err(|e| StoreError::InvalidRequest(e.to_string()))?,
                )
                .build(),
            WriteOperation::Delete(key) => WriteRequest::builder()
                .delete_request(
                    DeleteRequest::builder()
                        .set_key(Some(key))
                        .build()
                        .map_err(|e| StoreError::InvalidRequest(e.to_string()))?,
                )
                .build(),
        };
        Ok(request)
    }

    fn from_write_request(request: WriteRequest) -> Option<WriteOperation> {
        if let Some(put) = request.put_request {
            return Some(WriteOperation::Put(put.item));
        }
        request
            .delete_request
            .map(|delete| WriteOperation::Delete(delete.key))
    }
}

#[async_trait]
impl KeyedStore for DynamoKeyedStore {
    #[instrument(skip(self, exclusive_start_key), fields(table = %query.table, index = ?query.index))]
    async fn query(
        &self,
        query: &KeyQuery,
        exclusive_start_key: Option<Item>,
    ) -> Result<QueryPage, StoreError> {
        let (expression, names, values) = Self::key_condition(query);

        let result = self
            .client
            .query()
            .table_name(&query.table)
            .set_index_name(query.index.clone())
            .key_condition_expression(expression)
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .set_limit(query.limit)
            .set_exclusive_start_key(exclusive_start_key)
            .send()
            .await
            .map_err(|e| StoreError::ReadError(e.into_service_error().to_string()))?;

        let items = result.items.unwrap_or_default();
        debug!(count = items.len(), "クエリ結果を取得");

        Ok(QueryPage {
            items,
            last_evaluated_key: result.last_evaluated_key.filter(|k| !k.is_empty()),
        })
    }

    async fn get_item(&self, table: &str, key: Item) -> Result<Option<Item>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| StoreError::ReadError(e.into_service_error().to_string()))?;

        Ok(result.item)
    }

    async fn batch_get(&self, table: &str, keys: Vec<Item>) -> Result<BatchGetPage, StoreError> {
        if keys.len() > MAX_BATCH_GET_SIZE {
            return Err(StoreError::InvalidRequest(format!(
                "batch get of {} keys exceeds {}",
                keys.len(),
                MAX_BATCH_GET_SIZE
            )));
        }
        if keys.is_empty() {
            return Ok(BatchGetPage::default());
        }

        let keys_and_attributes = KeysAndAttributes::builder()
            .set_keys(Some(keys))
            .build()
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))?;

        let result = self
            .client
            .batch_get_item()
            .request_items(table, keys_and_attributes)
            .send()
            .await
            .map_err(|e| StoreError::ReadError(e.into_service_error().to_string()))?;

        let items = result
            .responses
            .and_then(|mut responses| responses.remove(table))
            .unwrap_or_default();
        let unprocessed_keys = result
            .unprocessed_keys
            .and_then(|mut unprocessed| unprocessed.remove(table))
            .map(|k| k.keys)
            .unwrap_or_default();

        Ok(BatchGetPage {
            items,
            unprocessed_keys,
        })
    }

    async fn batch_write(
        &self,
        table: &str,
        writes: Vec<WriteOperation>,
    ) -> Result<Vec<WriteOperation>, StoreError> {
        if writes.len() > MAX_BATCH_SIZE {
            return Err(StoreError::InvalidRequest(format!(
                "batch write of {} items exceeds {}",
                writes.len(),
                MAX_BATCH_SIZE
            )));
        }
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let requests = writes
            .into_iter()
            .map(Self::to_write_request)
            .collect::<Result<Vec<_>, _>>()?;

        let result = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .send()
            .await
            .map_err(|e| StoreError::WriteError(e.into_service_error().to_string()))?;

        let unprocessed = result
            .unprocessed_items
            .and_then(|mut unprocessed| unprocessed.remove(table))
            .unwrap_or_default()
            .into_iter()
            .filter_map(Self::from_write_request)
            .collect();

        Ok(unprocessed)
    }
}
