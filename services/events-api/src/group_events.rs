//! グループのイベント参照API
//!
//! - `GET /v1/groups/{group_id}/events`: 日時範囲とカーソルによるページング
//! - `GET /v1/groups/{group_id}/events/next`: 次に開催されるイベント
//! - `GET /v1/groups/{group_id}/events/{event_id}`: IDで1件取得
//!
//! イベントテーブルのGSI（groupId, dateTime）を検索する。

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    routing::get,
};
use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, Utc};
use meetup::domain::{Clock, Event, format_store_datetime};
use meetup::infrastructure::event_repository::{
    DATE_TIME_ATTRIBUTE, EVENT_ID_ATTRIBUTE, GROUP_ID_ATTRIBUTE,
};
use meetup::infrastructure::{Item, KeyQuery, KeyedStore, SortKeyCondition, StoreError, string_key};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;

use crate::error::ApiError;

/// 一覧取得の条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventsQuery {
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
    pub limit: Option<i32>,
}

/// 一覧の1ページ
#[derive(Debug, Clone, PartialEq)]
pub struct EventsPage {
    pub events: Vec<Event>,
    /// 続きがある場合の次ページの条件
    pub next: Option<EventsQuery>,
}

/// イベント参照のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GroupEventsError {
    #[error("invalid cursor")]
    InvalidCursor,

    #[error("limit must be at least 1")]
    InvalidLimit,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("stored event could not be decoded: {0}")]
    Decode(String),
}

impl From<GroupEventsError> for ApiError {
    fn from(err: GroupEventsError) -> Self {
        match err {
            GroupEventsError::InvalidCursor | GroupEventsError::InvalidLimit => {
                ApiError::bad_request(err.to_string())
            }
            other => {
                error!(error = %other, "イベントの参照に失敗");
                ApiError::internal_error()
            }
        }
    }
}

// ============================================================================
// カーソル
// ============================================================================

/// 再開キーをカーソル文字列にする（`b64(id).b64(groupId).b64(dateTime)`）
pub fn encode_cursor(last_key: &Item) -> Result<String, GroupEventsError> {
    let part = |attribute: &str| {
        last_key
            .get(attribute)
            .and_then(|v| v.as_s().ok())
            .map(|v| URL_SAFE.encode(v.as_bytes()))
            .ok_or_else(|| GroupEventsError::Decode(format!("last evaluated key lacks {attribute}")))
    };

    Ok(format!(
        "{}.{}.{}",
        part(EVENT_ID_ATTRIBUTE)?,
        part(GROUP_ID_ATTRIBUTE)?,
        part(DATE_TIME_ATTRIBUTE)?
    ))
}

/// カーソル文字列を再開キーに戻す
pub fn decode_cursor(cursor: &str) -> Result<Item, GroupEventsError> {
    let parts: Vec<&str> = cursor.split('.').collect();
    let [id, group_id, date_time] = parts.as_slice() else {
        return Err(GroupEventsError::InvalidCursor);
    };

    let decode = |part: &str| {
        URL_SAFE
            .decode(part)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(GroupEventsError::InvalidCursor)
    };

    let mut key = string_key(EVENT_ID_ATTRIBUTE, decode(id)?);
    key.extend(string_key(GROUP_ID_ATTRIBUTE, decode(group_id)?));
    key.extend(string_key(DATE_TIME_ATTRIBUTE, decode(date_time)?));
    Ok(key)
}

// ============================================================================
// リポジトリ
// ============================================================================

/// グループのイベント参照トレイト
#[async_trait]
pub trait GroupEventRepository: Send + Sync {
    /// 条件に合うイベントを1ページ分取得する
    async fn paginated_events(
        &self,
        group_id: &str,
        query: &EventsQuery,
    ) -> Result<EventsPage, GroupEventsError>;

    /// 現在時刻より後の最初のイベントを取得する
    async fn next_event(&self, group_id: &str) -> Result<Option<Event>, GroupEventsError>;

    /// IDでイベントを取得する。別グループのイベントは`None`
    async fn event_by_id(
        &self,
        group_id: &str,
        event_id: &str,
    ) -> Result<Option<Event>, GroupEventsError>;
}

/// キー付きストアを使うGroupEventRepository実装
pub struct StoreGroupEventRepository {
    store: Arc<dyn KeyedStore>,
    events_table: String,
    group_date_index: String,
    clock: Arc<dyn Clock>,
}

impl StoreGroupEventRepository {
    /// 新しいStoreGroupEventRepositoryを作成
    ///
    /// # 引数
    /// * `store` - キー付きストア
    /// * `events_table` - イベントテーブル名
    /// * `group_date_index` - GSI（groupId, dateTime）の名前
    /// * `clock` - 範囲指定がない場合の基準時刻
    pub fn new(
        store: Arc<dyn KeyedStore>,
        events_table: impl Into<String>,
        group_date_index: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            events_table: events_table.into(),
            group_date_index: group_date_index.into(),
            clock,
        }
    }

    fn group_query(&self, group_id: &str, condition: SortKeyCondition) -> KeyQuery {
        KeyQuery::partition(&self.events_table, GROUP_ID_ATTRIBUTE, group_id)
            .index(&self.group_date_index)
            .sort(DATE_TIME_ATTRIBUTE, condition)
    }

    fn range_condition(&self, query: &EventsQuery) -> SortKeyCondition {
        match (query.after, query.before) {
            (Some(after), Some(before)) => SortKeyCondition::Between(
                format_store_datetime(&after),
                format_store_datetime(&before),
            ),
            (Some(after), None) => SortKeyCondition::GreaterThan(format_store_datetime(&after)),
            (None, Some(before)) => SortKeyCondition::LessThan(format_store_datetime(&before)),
            (None, None) => SortKeyCondition::GreaterThan(format_store_datetime(&self.clock.now())),
        }
    }
}

fn to_event(item: Item) -> Result<Event, GroupEventsError> {
    serde_dynamo::from_item(item).map_err(|e| GroupEventsError::Decode(e.to_string()))
}

#[async_trait]
impl GroupEventRepository for StoreGroupEventRepository {
    #[instrument(skip(self))]
    async fn paginated_events(
        &self,
        group_id: &str,
        query: &EventsQuery,
    ) -> Result<EventsPage, GroupEventsError> {
        let mut key_query = self.group_query(group_id, self.range_condition(query));
        if let Some(limit) = query.limit {
            if limit < 1 {
                return Err(GroupEventsError::InvalidLimit);
            }
            key_query = key_query.limit(limit);
        }

        let start_key = match query.cursor.as_deref() {
            Some(cursor) if !cursor.is_empty() => Some(decode_cursor(cursor)?),
            _ => None,
        };

        let page = self.store.query(&key_query, start_key).await?;
        let events = page
            .items
            .into_iter()
            .map(to_event)
            .collect::<Result<Vec<_>, _>>()?;

        let next = match page.last_evaluated_key {
            Some(last_key) => Some(EventsQuery {
                cursor: Some(encode_cursor(&last_key)?),
                ..query.clone()
            }),
            None => None,
        };

        debug!(count = events.len(), has_next = next.is_some(), "イベントを取得");
        Ok(EventsPage { events, next })
    }

    #[instrument(skip(self))]
    async fn next_event(&self, group_id: &str) -> Result<Option<Event>, GroupEventsError> {
        let now = format_store_datetime(&self.clock.now());
        let key_query = self
            .group_query(group_id, SortKeyCondition::GreaterThan(now))
            .limit(1);

        let page = self.store.query(&key_query, None).await?;
        page.items.into_iter().next().map(to_event).transpose()
    }

    #[instrument(skip(self))]
    async fn event_by_id(
        &self,
        group_id: &str,
        event_id: &str,
    ) -> Result<Option<Event>, GroupEventsError> {
        let item = self
            .store
            .get_item(&self.events_table, string_key(EVENT_ID_ATTRIBUTE, event_id))
            .await?;

        let event = item.map(to_event).transpose()?;
        Ok(event.filter(|e| e.group_id == group_id))
    }
}

// ============================================================================
// レスポンスDTO
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDto {
    pub urlname: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueDto {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostDto {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDto {
    pub base_url: String,
    pub preview: String,
}

/// イベントのレスポンス形式
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub id: String,
    pub group: GroupDto,
    pub title: String,
    pub event_url: String,
    pub description: String,
    pub date_time: Option<DateTime<Utc>>,
    pub duration: String,
    pub venue: Option<VenueDto>,
    pub host: Option<HostDto>,
    pub images: Vec<ImageDto>,
}

impl From<Event> for EventDto {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            group: GroupDto {
                urlname: event.group_id,
                name: event.group_name,
            },
            title: event.title,
            event_url: event.event_url,
            description: event.description,
            date_time: event.date_time,
            duration: event.duration,
            venue: event.venue.map(|v| VenueDto {
                name: v.name,
                address: v.address,
                city: v.city,
                state: v.state,
                postal_code: v.postal_code,
            }),
            host: event.host.map(|h| HostDto { name: h.name }),
            images: event
                .images
                .into_iter()
                .map(|i| ImageDto {
                    base_url: i.base_url,
                    preview: i.preview,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub items: Vec<EventDto>,
    pub next_page_url: Option<String>,
}

/// 次ページのURLを組み立てる
fn next_page_url(app_url: &Url, group_id: &str, next: &EventsQuery) -> Option<String> {
    let mut url = app_url.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["v1", "groups", group_id, "events"]);

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        if let Some(cursor) = &next.cursor {
            pairs.append_pair("cursor", cursor);
        }
        if let Some(limit) = next.limit {
            pairs.append_pair("limit", &limit.to_string());
        }
        if let Some(before) = &next.before {
            pairs.append_pair("before", &format_store_datetime(before));
        }
        if let Some(after) = &next.after {
            pairs.append_pair("after", &format_store_datetime(after));
        }
    }

    Some(url.to_string())
}

// ============================================================================
// HTTPハンドラー
// ============================================================================

/// イベント参照ルートの状態
#[derive(Clone)]
pub struct GroupEventsState {
    pub repository: Arc<dyn GroupEventRepository>,
    pub app_url: Url,
}

/// GET /v1/groups/{group_id}/events
async fn list_events(
    State(state): State<GroupEventsState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Json<EventsResponse>, ApiError> {
    let Path(group_id) = path.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let page = state.repository.paginated_events(&group_id, &query).await?;
    let next_page_url = page
        .next
        .as_ref()
        .and_then(|next| next_page_url(&state.app_url, &group_id, next));

    Ok(Json(EventsResponse {
        items: page.events.into_iter().map(EventDto::from).collect(),
        next_page_url,
    }))
}

/// GET /v1/groups/{group_id}/events/next
async fn next_event(
    State(state): State<GroupEventsState>,
    Path(group_id): Path<String>,
) -> Result<Json<EventDto>, ApiError> {
    state
        .repository
        .next_event(&group_id)
        .await?
        .map(|event| Json(event.into()))
        .ok_or_else(ApiError::not_found)
}

/// GET /v1/groups/{group_id}/events/{event_id}
async fn event_by_id(
    State(state): State<GroupEventsState>,
    Path((group_id, event_id)): Path<(String, String)>,
) -> Result<Json<EventDto>, ApiError> {
    state
        .repository
        .event_by_id(&group_id, &event_id)
        .await?
        .map(|event| Json(event.into()))
        .ok_or_else(ApiError::not_found)
}

/// イベント参照のルーター（認証は呼び出し側で適用する）
pub fn routes(state: GroupEventsState) -> Router {
    Router::new()
        .route("/v1/groups/{group_id}/events", get(list_events))
        .route("/v1/groups/{group_id}/events/next", get(next_event))
        .route("/v1/groups/{group_id}/events/{event_id}", get(event_by_id))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, TimeZone};
    use meetup::domain::FixedClock;
    use meetup::infrastructure::InMemoryKeyedStore;
    use meetup::infrastructure::memory_store::s;
    use tower::ServiceExt;

    pub(crate) const EVENTS: &str = "MeetupEvents";
    pub(crate) const INDEX: &str = "GroupIdDateTimeIndex";
    pub(crate) const APP_URL: &str = "https://api.example.org";

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn events_store() -> InMemoryKeyedStore {
        InMemoryKeyedStore::new().with_index(INDEX, GROUP_ID_ATTRIBUTE, DATE_TIME_ATTRIBUTE)
    }

    /// `now()`から`days`日後のイベントを追加する
    pub(crate) fn add_event(store: &InMemoryKeyedStore, id: &str, group: &str, days: Option<i64>) {
        let mut item: Item = [
            ("id".to_string(), s(id)),
            ("groupId".to_string(), s(group)),
            ("groupName".to_string(), s(format!("{group} name"))),
            ("title".to_string(), s(format!("title {id}"))),
        ]
        .into();
        if let Some(days) = days {
            item.insert(
                "dateTime".to_string(),
                s(format_store_datetime(&(now() + Duration::days(days)))),
            );
        }
        store.put_item(EVENTS, item);
    }

    struct Fixture {
        store: Arc<InMemoryKeyedStore>,
        repository: Arc<StoreGroupEventRepository>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(events_store());
        add_event(&store, "past", "sgf-devs", Some(-3));
        add_event(&store, "e1", "sgf-devs", Some(1));
        add_event(&store, "e2", "sgf-devs", Some(2));
        add_event(&store, "e3", "sgf-devs", Some(3));
        add_event(&store, "undated", "sgf-devs", None);
        add_event(&store, "other", "other-group", Some(1));
        let repository = Arc::new(StoreGroupEventRepository::new(
            store.clone(),
            EVENTS,
            INDEX,
            Arc::new(FixedClock::new(now())),
        ));
        Fixture { store, repository }
    }

    fn ids(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.id.as_str()).collect()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    fn app(f: &Fixture) -> Router {
        routes(GroupEventsState {
            repository: f.repository.clone(),
            app_url: Url::parse(APP_URL).unwrap(),
        })
    }

    // ==================== カーソル ====================

    #[test]
    fn test_cursor_layout() {
        let mut key = string_key("id", "e1");
        key.extend(string_key("groupId", "sgf-devs"));
        key.extend(string_key("dateTime", "2025-04-02T12:00:00Z"));

        let cursor = encode_cursor(&key).unwrap();

        assert_eq!(cursor.split('.').count(), 3);
        assert_eq!(cursor.split('.').next(), Some("ZTE="));
        assert_eq!(decode_cursor(&cursor).unwrap(), key);
    }

    #[test]
    fn test_malformed_cursors_are_rejected() {
        for cursor in ["", "abc", "a.b", "ZTE=.ZTE=.ZTE=.ZTE=", "!!!.ZTE=.ZTE="] {
            assert_eq!(
                decode_cursor(cursor),
                Err(GroupEventsError::InvalidCursor),
                "cursor {cursor:?}"
            );
        }
    }

    // ==================== リポジトリ ====================

    #[tokio::test]
    async fn test_default_range_is_upcoming_only() {
        let f = fixture();

        let page = f
            .repository
            .paginated_events("sgf-devs", &EventsQuery::default())
            .await
            .unwrap();

        assert_eq!(ids(&page.events), vec!["e1", "e2", "e3"]);
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_before_and_after_narrow_the_range() {
        let f = fixture();

        let before = EventsQuery {
            before: Some(now() + Duration::days(2)),
            ..Default::default()
        };
        let page = f.repository.paginated_events("sgf-devs", &before).await.unwrap();
        assert_eq!(ids(&page.events), vec!["past", "e1"]);

        let after = EventsQuery {
            after: Some(now() + Duration::days(1)),
            ..Default::default()
        };
        let page = f.repository.paginated_events("sgf-devs", &after).await.unwrap();
        assert_eq!(ids(&page.events), vec!["e2", "e3"]);

        let between = EventsQuery {
            after: Some(now() - Duration::days(5)),
            before: Some(now() + Duration::days(2)),
            ..Default::default()
        };
        let page = f.repository.paginated_events("sgf-devs", &between).await.unwrap();
        assert_eq!(ids(&page.events), vec!["past", "e1", "e2"]);
    }

    #[tokio::test]
    async fn test_cursor_pagination_walks_all_pages() {
        let f = fixture();
        let first = EventsQuery {
            limit: Some(2),
            ..Default::default()
        };

        let page = f.repository.paginated_events("sgf-devs", &first).await.unwrap();
        assert_eq!(ids(&page.events), vec!["e1", "e2"]);
        let next = page.next.unwrap();
        assert_eq!(next.limit, Some(2));
        assert!(next.cursor.is_some());

        let page = f.repository.paginated_events("sgf-devs", &next).await.unwrap();
        assert_eq!(ids(&page.events), vec!["e3"]);
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_invalid_limit_and_cursor() {
        let f = fixture();

        let zero = EventsQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(
            f.repository.paginated_events("sgf-devs", &zero).await,
            Err(GroupEventsError::InvalidLimit)
        );

        let garbage = EventsQuery {
            cursor: Some("not-a-cursor".to_string()),
            ..Default::default()
        };
        assert_eq!(
            f.repository.paginated_events("sgf-devs", &garbage).await,
            Err(GroupEventsError::InvalidCursor)
        );
        assert_eq!(f.store.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_next_event() {
        let f = fixture();

        let next = f.repository.next_event("sgf-devs").await.unwrap();
        assert_eq!(next.map(|e| e.id), Some("e1".to_string()));

        assert_eq!(f.repository.next_event("empty-group").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_event_by_id_checks_group() {
        let f = fixture();

        let event = f.repository.event_by_id("sgf-devs", "undated").await.unwrap();
        assert_eq!(event.map(|e| e.id), Some("undated".to_string()));

        assert_eq!(f.repository.event_by_id("sgf-devs", "other").await.unwrap(), None);
        assert_eq!(f.repository.event_by_id("sgf-devs", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let f = fixture();
        f.store.set_next_error(StoreError::ReadError("throttled".into()));

        let err = f.repository.next_event("sgf-devs").await.unwrap_err();

        assert!(matches!(err, GroupEventsError::Store(_)));
        assert_eq!(ApiError::from(err).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ==================== DTO ====================

    #[test]
    fn test_event_dto_shape() {
        let event = Event {
            id: "e1".to_string(),
            group_id: "sgf-devs".to_string(),
            group_name: "SGF Devs".to_string(),
            title: "Rust".to_string(),
            event_url: "https://www.meetup.com/sgf-devs/events/1".to_string(),
            description: String::new(),
            date_time: None,
            duration: "PT2H".to_string(),
            venue: None,
            host: Some(meetup::domain::Host {
                name: "Alex".to_string(),
            }),
            images: vec![meetup::domain::Image {
                base_url: "https://img".to_string(),
                preview: String::new(),
            }],
        };

        let json = serde_json::to_value(EventDto::from(event)).unwrap();

        assert_eq!(json["group"], serde_json::json!({"urlname": "sgf-devs", "name": "SGF Devs"}));
        assert_eq!(json["eventUrl"], "https://www.meetup.com/sgf-devs/events/1");
        assert_eq!(json["dateTime"], serde_json::Value::Null);
        assert_eq!(json["venue"], serde_json::Value::Null);
        assert_eq!(json["host"]["name"], "Alex");
        assert_eq!(json["images"][0]["baseUrl"], "https://img");
    }

    #[test]
    fn test_next_page_url_carries_filters() {
        let next = EventsQuery {
            before: Some(now() + Duration::days(7)),
            after: None,
            cursor: Some("abc=.def=.ghi=".to_string()),
            limit: Some(5),
        };

        let url = next_page_url(&Url::parse(APP_URL).unwrap(), "sgf-devs", &next).unwrap();
        let parsed = Url::parse(&url).unwrap();

        assert_eq!(parsed.path(), "/v1/groups/sgf-devs/events");
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("cursor".to_string(), "abc=.def=.ghi=".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("before".to_string(), "2025-04-08T12:00:00Z".to_string()),
            ]
        );
    }

    // ==================== ハンドラー ====================

    #[tokio::test]
    async fn test_list_events_follows_next_page_url() {
        let f = fixture();

        let (status, body) = get_json(app(&f), "/v1/groups/sgf-devs/events?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["items"][0]["id"], "e1");
        assert_eq!(body["items"][0]["dateTime"], "2025-04-02T12:00:00Z");

        let next_url = Url::parse(body["nextPageUrl"].as_str().unwrap()).unwrap();
        assert_eq!(next_url.host_str(), Some("api.example.org"));
        let path_and_query = format!("{}?{}", next_url.path(), next_url.query().unwrap());

        let (status, body) = get_json(app(&f), &path_and_query).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["id"], "e3");
        assert_eq!(body["nextPageUrl"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_list_events_bad_requests() {
        let f = fixture();

        for uri in [
            "/v1/groups/sgf-devs/events?limit=0",
            "/v1/groups/sgf-devs/events?limit=many",
            "/v1/groups/sgf-devs/events?cursor=broken",
            "/v1/groups/sgf-devs/events?before=yesterday",
        ] {
            let (status, body) = get_json(app(&f), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["status"], 400);
        }
    }

    #[tokio::test]
    async fn test_next_and_by_id_routes() {
        let f = fixture();

        let (status, body) = get_json(app(&f), "/v1/groups/sgf-devs/events/next").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "e1");

        let (status, _) = get_json(app(&f), "/v1/groups/nobody/events/next").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get_json(app(&f), "/v1/groups/sgf-devs/events/e2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "title e2");
        assert_eq!(body["group"]["name"], "sgf-devs name");

        let (status, body) = get_json(app(&f), "/v1/groups/sgf-devs/events/other").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["title"], "Not Found");
    }
}
