//! インメモリのキー付きストア
//!
//! テストとローカル開発用。DynamoDBの以下の挙動を再現する:
//! - テーブルはハッシュキー属性（デフォルト`id`）で一意
//! - GSIはパーティション属性+ソート属性で検索でき、ソート属性を持たないアイテムは含まれない
//! - ページサイズを超えると`last_evaluated_key`を返す
//! - バッチ件数の上限を超えるとエラー
//! - 未処理分（UnprocessedItems/UnprocessedKeys）を任意に発生させられる

use super::keyed_store::{
    BatchGetPage, Item, KeyQuery, KeyedStore, MAX_BATCH_GET_SIZE, MAX_BATCH_SIZE, QueryPage,
    SortKeyCondition, StoreError, WriteOperation,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// 1ページあたりのデフォルト件数
const DEFAULT_PAGE_SIZE: usize = 100;

/// テーブルのデフォルトのハッシュキー属性
const DEFAULT_KEY_ATTRIBUTE: &str = "id";

#[derive(Debug, Default)]
struct State {
    /// テーブル名 -> (キー値 -> アイテム)
    tables: HashMap<String, BTreeMap<String, Item>>,
    /// 次のbatch_write呼び出しで未処理にする件数（呼び出しごとに先頭から消費）
    unprocessed_writes: VecDeque<usize>,
    /// 次のbatch_get呼び出しで未処理にする件数
    unprocessed_gets: VecDeque<usize>,
    /// 次の操作で返すエラー
    next_error: Option<StoreError>,
    /// テーブル名 -> batch_writeで常に返すエラー
    write_errors: HashMap<String, StoreError>,
}

/// KeyedStoreのインメモリ実装
#[derive(Debug)]
pub struct InMemoryKeyedStore {
    state: Mutex<State>,
    /// テーブル名 -> ハッシュキー属性
    key_attributes: HashMap<String, String>,
    /// インデックス名 -> (パーティション属性, ソート属性)
    indexes: HashMap<String, (String, Option<String>)>,
    page_size: usize,
    query_calls: AtomicUsize,
    get_item_calls: AtomicUsize,
    batch_get_calls: AtomicUsize,
    batch_write_calls: AtomicUsize,
}

impl Default for InMemoryKeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

fn string_attr<'a>(item: &'a Item, attribute: &str) -> Option<&'a str> {
    item.get(attribute).and_then(|v| v.as_s().ok()).map(String::as_str)
}

fn matches_condition(value: &str, condition: &SortKeyCondition) -> bool {
    match condition {
        SortKeyCondition::GreaterThan(v) => value > v.as_str(),
        SortKeyCondition::LessThan(v) => value < v.as_str(),
        SortKeyCondition::Between(from, to) => value >= from.as_str() && value <= to.as_str(),
    }
}

impl InMemoryKeyedStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            key_attributes: HashMap::new(),
            indexes: HashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            query_calls: AtomicUsize::new(0),
            get_item_calls: AtomicUsize::new(0),
            batch_get_calls: AtomicUsize::new(0),
            batch_write_calls: AtomicUsize::new(0),
        }
    }

    /// テーブルのハッシュキー属性を指定する（未指定は`id`）
    pub fn with_table_key(mut self, table: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.key_attributes.insert(table.into(), attribute.into());
        self
    }

    /// セカンダリインデックスを定義する
    pub fn with_index(
        mut self,
        index: impl Into<String>,
        partition_attribute: impl Into<String>,
        sort_attribute: impl Into<String>,
    ) -> Self {
        self.indexes.insert(
            index.into(),
            (partition_attribute.into(), Some(sort_attribute.into())),
        );
        self
    }

    /// 1ページあたりの件数を指定する
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key_attribute(&self, table: &str) -> &str {
        self.key_attributes
            .get(table)
            .map(String::as_str)
            .unwrap_or(DEFAULT_KEY_ATTRIBUTE)
    }

    fn key_value(&self, table: &str, item: &Item) -> Result<String, StoreError> {
        let attribute = self.key_attribute(table);
        string_attr(item, attribute)
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidRequest(format!("missing key attribute: {}", attribute)))
    }

    fn take_error(state: &mut State) -> Result<(), StoreError> {
        match state.next_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// アイテムを直接書き込む（テストの初期データ用）
    pub fn put_item(&self, table: &str, item: Item) {
        let Ok(key) = self.key_value(table, &item) else {
            return;
        };
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key, item);
    }

    /// テーブルの全アイテム（キー順）
    pub fn items(&self, table: &str) -> Vec<Item> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// キー値で1件取得する
    pub fn get(&self, table: &str, key: &str) -> Option<Item> {
        self.lock().tables.get(table).and_then(|t| t.get(key).cloned())
    }

    /// 次の操作でエラーを返す
    pub fn set_next_error(&self, error: StoreError) {
        self.lock().next_error = Some(error);
    }

    /// 指定テーブルへのbatch_writeを常に失敗させる
    pub fn set_write_error(&self, table: &str, error: StoreError) {
        self.lock().write_errors.insert(table.to_string(), error);
    }

    /// batch_write呼び出しごとに未処理とする件数を設定する
    pub fn set_unprocessed_writes(&self, counts: &[usize]) {
        self.lock().unprocessed_writes = counts.iter().copied().collect();
    }

    /// batch_get呼び出しごとに未処理とする件数を設定する
    pub fn set_unprocessed_gets(&self, counts: &[usize]) {
        self.lock().unprocessed_gets = counts.iter().copied().collect();
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn get_item_calls(&self) -> usize {
        self.get_item_calls.load(Ordering::SeqCst)
    }

    pub fn batch_get_calls(&self) -> usize {
        self.batch_get_calls.load(Ordering::SeqCst)
    }

    pub fn batch_write_calls(&self) -> usize {
        self.batch_write_calls.load(Ordering::SeqCst)
    }

    /// 検索に使うソート属性（インデックス指定時はインデックスのもの）
    fn sort_attribute(&self, query: &KeyQuery) -> Option<String> {
        match &query.index {
            Some(index) => self.indexes.get(index).and_then(|(_, sort)| sort.clone()),
            None => query.sort.as_ref().map(|(attribute, _)| attribute.clone()),
        }
    }

    /// 再開キーを作成する（テーブルキー + インデックスのキー属性）
    fn evaluated_key(&self, query: &KeyQuery, item: &Item, sort_attribute: Option<&str>) -> Item {
        let mut attributes = vec![
            self.key_attribute(&query.table).to_string(),
            query.partition_attribute.clone(),
        ];
        if let Some(sort) = sort_attribute {
            attributes.push(sort.to_string());
        }

        attributes
            .into_iter()
            .filter_map(|a| item.get(&a).cloned().map(|v| (a, v)))
            .collect()
    }
}

#[async_trait]
impl KeyedStore for InMemoryKeyedStore {
    async fn query(
        &self,
        query: &KeyQuery,
        exclusive_start_key: Option<Item>,
    ) -> Result<QueryPage, StoreError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        Self::take_error(&mut state)?;

        let sort_attribute = self.sort_attribute(query);
        let key_attribute = self.key_attribute(&query.table).to_string();

        let mut matched: Vec<&Item> = state
            .tables
            .get(&query.table)
            .map(|t| t.values().collect())
            .unwrap_or_default();

        matched.retain(|item| {
            if string_attr(item, &query.partition_attribute) != Some(query.partition_value.as_str()) {
                return false;
            }
            // スパースインデックス: ソート属性を持たないアイテムは含まれない
            if let Some(sort) = &sort_attribute
                && query.index.is_some()
                && string_attr(item, sort).is_none()
            {
                return false;
            }
            match &query.sort {
                Some((attribute, condition)) => string_attr(item, attribute)
                    .map(|v| matches_condition(v, condition))
                    .unwrap_or(false),
                None => true,
            }
        });

        matched.sort_by(|a, b| {
            let sort_a = sort_attribute.as_deref().and_then(|s| string_attr(a, s));
            let sort_b = sort_attribute.as_deref().and_then(|s| string_attr(b, s));
            sort_a
                .cmp(&sort_b)
                .then_with(|| string_attr(a, &key_attribute).cmp(&string_attr(b, &key_attribute)))
        });

        // 再開キーの直後から返す
        let start = match exclusive_start_key {
            Some(key) => {
                let start_key = string_attr(&key, &key_attribute).map(str::to_string);
                matched
                    .iter()
                    .position(|item| string_attr(item, &key_attribute) == start_key.as_deref())
                    .map(|p| p + 1)
                    .unwrap_or(matched.len())
            }
            None => 0,
        };

        let limit = query
            .limit
            .map(|l| l.max(1) as usize)
            .unwrap_or(usize::MAX)
            .min(self.page_size);

        let remaining = &matched[start.min(matched.len())..];
        let page: Vec<Item> = remaining.iter().take(limit).map(|i| (*i).clone()).collect();

        let last_evaluated_key = if remaining.len() > page.len() {
            page.last()
                .map(|last| self.evaluated_key(query, last, sort_attribute.as_deref()))
        } else {
            None
        };

        Ok(QueryPage {
            items: page,
            last_evaluated_key,
        })
    }

    async fn get_item(&self, table: &str, key: Item) -> Result<Option<Item>, StoreError> {
        self.get_item_calls.fetch_add(1, Ordering::SeqCst);
        let key_value = self.key_value(table, &key)?;
        let mut state = self.lock();
        Self::take_error(&mut state)?;

        Ok(state.tables.get(table).and_then(|t| t.get(&key_value).cloned()))
    }

    async fn batch_get(&self, table: &str, keys: Vec<Item>) -> Result<BatchGetPage, StoreError> {
        self.batch_get_calls.fetch_add(1, Ordering::SeqCst);
        if keys.len() > MAX_BATCH_GET_SIZE {
            return Err(StoreError::InvalidRequest(format!(
                "batch get of {} keys exceeds {}",
                keys.len(),
                MAX_BATCH_GET_SIZE
            )));
        }

        let mut state = self.lock();
        Self::take_error(&mut state)?;

        let unprocessed_count = state.unprocessed_gets.pop_front().unwrap_or(0).min(keys.len());
        let mut keys = keys;
        let unprocessed_keys = keys.split_off(keys.len() - unprocessed_count);

        let mut items = Vec::new();
        for key in &keys {
            let key_value = self.key_value(table, key)?;
            if let Some(item) = state.tables.get(table).and_then(|t| t.get(&key_value)) {
                items.push(item.clone());
            }
        }

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
        self.batch_write_calls.fetch_add(1, Ordering::SeqCst);
        if writes.len() > MAX_BATCH_SIZE {
            return Err(StoreError::InvalidRequest(format!(
                "batch write of {} items exceeds {}",
                writes.len(),
                MAX_BATCH_SIZE
            )));
        }

        let mut state = self.lock();
        Self::take_error(&mut state)?;
        if let Some(error) = state.write_errors.get(table) {
            return Err(error.clone());
        }

        let unprocessed_count = state
            .unprocessed_writes
            .pop_front()
            .unwrap_or(0)
            .min(writes.len());
        let mut writes = writes;
        let unprocessed = writes.split_off(writes.len() - unprocessed_count);

        for write in writes {
            match write {
                WriteOperation::Put(item) => {
                    let key = self.key_value(table, &item)?;
                    state
                        .tables
                        .entry(table.to_string())
                        .or_default()
                        .insert(key, item);
                }
                WriteOperation::Delete(key) => {
                    let key = self.key_value(table, &key)?;
                    if let Some(t) = state.tables.get_mut(table) {
                        t.remove(&key);
                    }
                }
            }
        }

        Ok(unprocessed)
    }
}

/// 文字列属性を作成する（テストデータ用）
pub fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}
