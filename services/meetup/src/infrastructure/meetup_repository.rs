//! Meetupからのイベント取得
//!
//! グループの`unifiedEvents`をページングしながら取得する。
//! 取得済みイベントの最大日時がカットオフを超えた時点、または次ページがなくなった時点で停止する。
//! 停止判定はページ単位で、カットオフを跨いだページのイベントもすべて返す。

use super::graphql::{GraphQlError, GraphQlHandler};
use crate::domain::{Event, Host, Image, Venue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// 1ページの取得件数
pub const EVENTS_PAGE_SIZE: i64 = 20;

/// グループの今後のイベントを取得するクエリ
pub const FUTURE_EVENTS_QUERY: &str = r#"
query ($urlname: String!, $itemsNum: Int!, $cursor: String) {
  events: groupByUrlname(urlname: $urlname) {
    unifiedEvents(input: { first: $itemsNum, after: $cursor }) {
      count
      pageInfo {
        endCursor
        hasNextPage
      }
      edges {
        node {
          id
          title
          eventUrl
          description
          dateTime
          duration
          venue {
            name
            address
            city
            state
            postalCode
          }
          group {
            name
            urlname
          }
          host {
            name
          }
          images {
            baseUrl
            preview
          }
        }
      }
    }
  }
}
"#;

/// Meetupの日時形式（秒なし・オフセット付き）
const UPSTREAM_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M%:z";

/// イベント取得のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeetupRepositoryError {
    /// GraphQLの実行に失敗
    #[error("GraphQLクエリの実行に失敗: {0}")]
    Query(#[from] GraphQlError),

    /// レスポンスが想定した形でない
    #[error("GraphQLレスポンスのデコードに失敗: {0}")]
    Decode(String),

    /// GraphQLのエラー応答
    #[error("GraphQLエラー: {0}")]
    GraphQl(String),

    /// グループが存在しない
    #[error("グループが見つかりません: {0}")]
    GroupNotFound(String),
}

/// Meetupのイベント取得トレイト
#[async_trait]
pub trait MeetupRepository: Send + Sync {
    /// グループのイベントを`before`を超えるまでページングして取得する
    async fn events_until_date_for_group(
        &self,
        group: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<Event>, MeetupRepositoryError>;
}

// ============================================================================
// レスポンスの型
// ============================================================================

#[derive(Debug, Deserialize)]
struct FutureEventsResponse {
    data: Option<FutureEventsData>,
    #[serde(default)]
    errors: Vec<GraphQlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct FutureEventsData {
    events: Option<GroupEvents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupEvents {
    unified_events: UnifiedEvents,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnifiedEvents {
    page_info: PageInfo,
    #[serde(default)]
    edges: Vec<EventEdge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct EventEdge {
    node: EventNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventNode {
    id: String,
    title: Option<String>,
    event_url: Option<String>,
    description: Option<String>,
    date_time: Option<String>,
    duration: Option<String>,
    venue: Option<VenueNode>,
    group: Option<GroupNode>,
    host: Option<HostNode>,
    images: Option<Vec<ImageNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VenueNode {
    name: Option<String>,
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupNode {
    name: Option<String>,
    urlname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostNode {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageNode {
    base_url: Option<String>,
    preview: Option<String>,
}

/// Meetupの日時を解析する（`2025-04-15T18:00-05:00`、RFC 3339も可）
pub fn parse_upstream_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, UPSTREAM_DATETIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl EventNode {
    fn into_event(self) -> Event {
        let date_time = self.date_time.as_deref().and_then(|raw| {
            let parsed = parse_upstream_datetime(raw);
            if parsed.is_none() {
                warn!(event_id = %self.id, date_time = %raw, "イベント日時を解析できない");
            }
            parsed
        });
        let (group_id, group_name) = self
            .group
            .map(|g| (g.urlname.unwrap_or_default(), g.name.unwrap_or_default()))
            .unwrap_or_default();

        Event {
            id: self.id,
            group_id,
            group_name,
            title: self.title.unwrap_or_default(),
            event_url: self.event_url.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            date_time,
            duration: self.duration.unwrap_or_default(),
            venue: self.venue.map(|v| Venue {
                name: v.name.unwrap_or_default(),
                address: v.address.unwrap_or_default(),
                city: v.city.unwrap_or_default(),
                state: v.state.unwrap_or_default(),
                postal_code: v.postal_code.unwrap_or_default(),
            }),
            host: self.host.map(|h| Host {
                name: h.name.unwrap_or_default(),
            }),
            images: self
                .images
                .unwrap_or_default()
                .into_iter()
                .map(|i| Image {
                    base_url: i.base_url.unwrap_or_default(),
                    preview: i.preview.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// GraphQL実装
// ============================================================================

/// GraphQlHandlerを使うMeetupRepository実装
pub struct GraphQlMeetupRepository {
    handler: Arc<dyn GraphQlHandler>,
}

impl GraphQlMeetupRepository {
    pub fn new(handler: Arc<dyn GraphQlHandler>) -> Self {
        Self { handler }
    }

    /// 1ページ分を取得する
    async fn fetch_page(
        &self,
        group: &str,
        cursor: Option<&str>,
    ) -> Result<UnifiedEvents, MeetupRepositoryError> {
        let variables = json!({
            "urlname": group,
            "itemsNum": EVENTS_PAGE_SIZE,
            "cursor": cursor,
        });

        let raw = self.handler.execute_query(FUTURE_EVENTS_QUERY, variables).await?;
        let response: FutureEventsResponse =
            serde_json::from_value(raw).map_err(|e| MeetupRepositoryError::Decode(e.to_string()))?;

        let data = match response.data {
            Some(data) => data,
            None if !response.errors.is_empty() => {
                let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
                return Err(MeetupRepositoryError::GraphQl(messages.join("; ")));
            }
            None => return Err(MeetupRepositoryError::Decode("data is missing".to_string())),
        };

        if !response.errors.is_empty() {
            let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
            warn!(group = %group, errors = ?messages, "GraphQLの部分的なエラー");
        }

        data.events
            .map(|e| e.unified_events)
            .ok_or_else(|| MeetupRepositoryError::GroupNotFound(group.to_string()))
    }
}

#[async_trait]
impl MeetupRepository for GraphQlMeetupRepository {
    #[instrument(skip(self))]
    async fn events_until_date_for_group(
        &self,
        group: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<Event>, MeetupRepositoryError> {
        let mut events = Vec::new();
        let mut cursor: Option<String> = None;
        let mut latest: Option<DateTime<Utc>> = None;
        let mut pages = 0;

        loop {
            let page = self.fetch_page(group, cursor.as_deref()).await?;
            pages += 1;

            for edge in page.edges {
                let event = edge.node.into_event();
                if let Some(dt) = event.date_time {
                    latest = Some(latest.map_or(dt, |l| l.max(dt)));
                }
                events.push(event);
            }

            if latest.is_some_and(|l| l > before) {
                break;
            }
            if !page.page_info.has_next_page {
                break;
            }
            match page.page_info.end_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    warn!(group = %group, "hasNextPageだがendCursorがない");
                    break;
                }
            }
        }

        debug!(group = %group, pages, count = events.len(), "Meetupからイベントを取得");
        Ok(events)
    }
}
