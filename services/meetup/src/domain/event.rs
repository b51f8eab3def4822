//! Meetupイベントのドメインモデル
//!
//! DynamoDBのイベントテーブル/アーカイブテーブルに保存される形式と同じ構造を持つ。
//! `dateTime`はGSI（groupId, dateTime）のソートキーとして文字列比較されるため、
//! 常に固定幅・ゼロ埋めのUTC形式（`2025-04-12T10:00:00Z`）で保存する。

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Meetupイベント
///
/// `id`がグローバルに一意で、upsert/削除の唯一のキーとなる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// イベントID（再取得しても不変）
    pub id: String,
    /// グループID（Meetupのurlname）
    pub group_id: String,
    /// グループ名（非正規化）
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub event_url: String,
    #[serde(default)]
    pub description: String,
    /// 開催日時（未設定のイベントもある）
    ///
    /// `None`の場合は属性自体を書き込まない（GSIのキー属性が欠落し、範囲検索の対象外になる）。
    #[serde(
        default,
        with = "store_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_time: Option<DateTime<Utc>>,
    /// 開催時間（ISO-8601の期間表記など、不透明な文字列）
    #[serde(default)]
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<Venue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Host>,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// 開催場所
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
}

/// 主催者
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub name: String,
}

/// イベント画像
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub preview: String,
}

/// 日時をストア用の固定幅UTC文字列に変換する
///
/// 秒精度・`Z`サフィックス固定。範囲検索の境界値もこの関数で生成すること。
pub fn format_store_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// ストアの日時文字列を解析する
///
/// RFC 3339であればオフセット付きでも受け付け、UTCに正規化する。
pub fn parse_store_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc))
}

/// `Option<DateTime<Utc>>`をストア形式で（デ）シリアライズする
pub mod store_datetime {
    use super::{format_store_datetime, parse_store_datetime};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&format_store_datetime(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => parse_store_datetime(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> Event {
        Event {
            id: "evt-1".to_string(),
            group_id: "sgf-devs".to_string(),
            group_name: "SGF Devs".to_string(),
            title: "Rust勉強会".to_string(),
            event_url: "https://www.meetup.com/sgf-devs/events/1".to_string(),
            description: "説明".to_string(),
            date_time: Some(Utc.with_ymd_and_hms(2025, 4, 12, 10, 0, 0).unwrap()),
            duration: "PT2H".to_string(),
            venue: Some(Venue {
                name: "図書館".to_string(),
                city: "Springfield".to_string(),
                ..Default::default()
            }),
            host: Some(Host {
                name: "Alice".to_string(),
            }),
            images: vec![Image {
                base_url: "https://img.example.com/1".to_string(),
                preview: "https://img.example.com/1-preview".to_string(),
            }],
        }
    }

    // ==================== 日時フォーマット ====================

    #[test]
    fn test_format_store_datetime_is_fixed_width_utc() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_store_datetime(&dt), "2025-01-02T03:04:05Z");
    }

    #[test]
    fn test_format_store_datetime_drops_subseconds() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(789);
        assert_eq!(format_store_datetime(&dt), "2025-01-02T03:04:05Z");
    }

    #[test]
    fn test_store_strings_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2025, 9, 30, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        assert!(format_store_datetime(&earlier) < format_store_datetime(&later));
    }

    #[test]
    fn test_parse_store_datetime_normalizes_offset() {
        let parsed = parse_store_datetime("2025-04-15T18:00:00-05:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 4, 15, 23, 0, 0).unwrap());
    }

    // ==================== シリアライズ ====================

    #[test]
    fn test_event_serializes_with_camel_case_keys() {
        let json = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(json["groupId"], "sgf-devs");
        assert_eq!(json["groupName"], "SGF Devs");
        assert_eq!(json["eventUrl"], "https://www.meetup.com/sgf-devs/events/1");
        assert_eq!(json["dateTime"], "2025-04-12T10:00:00Z");
        assert_eq!(json["images"][0]["baseUrl"], "https://img.example.com/1");
    }

    #[test]
    fn test_event_without_date_omits_attribute() {
        let mut event = sample_event();
        event.date_time = None;
        event.venue = None;

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("dateTime").is_none());
        assert!(json.get("venue").is_none());
    }

    #[test]
    fn test_event_dynamo_item_keeps_fields() {
        let item: std::collections::HashMap<String, aws_sdk_dynamodb::types::AttributeValue> =
            serde_dynamo::to_item(sample_event()).unwrap();

        assert_eq!(item["id"].as_s().unwrap(), "evt-1");
        assert_eq!(item["dateTime"].as_s().unwrap(), "2025-04-12T10:00:00Z");

        let back: Event = serde_dynamo::from_item(item).unwrap();
        assert_eq!(back, sample_event());
    }

    #[test]
    fn test_event_deserializes_with_missing_optional_fields() {
        let json = serde_json::json!({
            "id": "evt-2",
            "groupId": "sgf-devs"
        });
        let event: Event = serde_json::from_value(json).unwrap();
        assert_eq!(event.id, "evt-2");
        assert!(event.date_time.is_none());
        assert!(event.images.is_empty());
    }
}
