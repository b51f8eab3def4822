/// インポートサービス
///
/// 設定された各グループについて、保存済みの今後のイベントとMeetup上のイベントを突き合わせ、
/// 取得したイベントをupsertし、Meetupから消えたイベントをアーカイブする。
/// グループ単位の失敗はログに記録するだけで、他のグループや実行全体は止めない。
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

use crate::domain::{Clock, ImportDiff};
use crate::infrastructure::{
    EventRepository, EventRepositoryError, MeetupRepository, MeetupRepositoryError,
};

/// 同時に処理するグループ数の上限
pub const MAX_CONCURRENT_GROUPS: usize = 3;

/// 取り込み対象期間（月）
pub const LOOKAHEAD_MONTHS: u32 = 6;

/// グループ単位のインポートエラー
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImportError {
    /// 保存済みイベントの取得に失敗
    #[error("保存済みイベントの取得に失敗: {0}")]
    StoredEvents(EventRepositoryError),

    /// Meetupからの取得に失敗
    #[error("Meetupからのイベント取得に失敗: {0}")]
    Upstream(#[from] MeetupRepositoryError),

    /// upsertに失敗
    #[error("イベントの保存に失敗: {0}")]
    Upsert(EventRepositoryError),

    /// アーカイブに失敗
    #[error("イベントのアーカイブに失敗: {0}")]
    Archive(EventRepositoryError),

    /// ワーカーの取得に失敗
    #[error("ワーカーの取得に失敗: {0}")]
    Worker(String),
}

/// 1グループ分の処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupImport {
    pub group: String,
    pub events_in_db: usize,
    pub events_from_meetup: usize,
    pub archived_events: usize,
}

/// インポート実行全体の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// 成功したグループ（完了順）
    pub succeeded: Vec<GroupImport>,
    /// 失敗したグループ名
    pub failed: Vec<String>,
}

impl ImportSummary {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// インポートを実行するサービス
pub struct ImportService<ER, MR>
where
    ER: EventRepository + 'static,
    MR: MeetupRepository + 'static,
{
    group_names: Vec<String>,
    clock: Arc<dyn Clock>,
    event_repo: Arc<ER>,
    meetup_repo: Arc<MR>,
}

impl<ER, MR> ImportService<ER, MR>
where
    ER: EventRepository + 'static,
    MR: MeetupRepository + 'static,
{
    /// 新しいImportServiceを作成
    ///
    /// # 引数
    /// * `group_names` - 対象グループのurlname
    /// * `clock` - カットオフ計算に使う時計
    /// * `event_repo` - イベントストア
    /// * `meetup_repo` - Meetupからのイベント取得
    pub fn new(
        group_names: Vec<String>,
        clock: Arc<dyn Clock>,
        event_repo: Arc<ER>,
        meetup_repo: Arc<MR>,
    ) -> Self {
        Self {
            group_names,
            clock,
            event_repo,
            meetup_repo,
        }
    }

    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }

    /// 取り込み対象の上限日時（現在時刻 + 6ヶ月）
    pub fn cutoff(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        now.checked_add_months(Months::new(LOOKAHEAD_MONTHS))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// すべてのグループをインポートする
    ///
    /// 最大3グループを並行に処理し、全グループの完了を待ってから戻る。
    /// 個々のグループのエラーは戻り値の`failed`に入り、呼び出し元へは伝播しない。
    #[instrument(skip(self), fields(groups = self.group_names.len()))]
    pub async fn import(&self) -> ImportSummary {
        let cutoff = self.cutoff();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_GROUPS));
        let mut tasks = JoinSet::new();
        let mut task_groups = HashMap::new();

        for group in &self.group_names {
            let group = group.clone();
            let semaphore = semaphore.clone();
            let event_repo = self.event_repo.clone();
            let meetup_repo = self.meetup_repo.clone();

            let handle = tasks.spawn({
                let group = group.clone();
                async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            import_group(event_repo.as_ref(), meetup_repo.as_ref(), &group, cutoff)
                                .await
                        }
                        Err(e) => Err(ImportError::Worker(e.to_string())),
                    };
                    (group, result)
                }
            });
            task_groups.insert(handle.id(), group);
        }

        let mut summary = ImportSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(done))) => {
                    info!(
                        group = %done.group,
                        events_in_db = done.events_in_db,
                        events_from_meetup = done.events_from_meetup,
                        archived_events = done.archived_events,
                        "グループのインポート完了"
                    );
                    summary.succeeded.push(done);
                }
                Ok((group, Err(e))) => {
                    error!(group = %group, error = %e, "グループのインポートに失敗");
                    summary.failed.push(group);
                }
                Err(e) => {
                    let group = task_groups.remove(&e.id()).unwrap_or_default();
                    error!(group = %group, error = %e, "インポートタスクが異常終了");
                    summary.failed.push(group);
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "インポート完了"
        );
        summary
    }
}

/// 1グループ分の突き合わせ
async fn import_group<ER, MR>(
    event_repo: &ER,
    meetup_repo: &MR,
    group: &str,
    cutoff: DateTime<Utc>,
) -> Result<GroupImport, ImportError>
where
    ER: EventRepository + ?Sized,
    MR: MeetupRepository + ?Sized,
{
    let stored = event_repo
        .upcoming_events_for_group(group)
        .await
        .map_err(ImportError::StoredEvents)?;

    let incoming = meetup_repo.events_until_date_for_group(group, cutoff).await?;

    let diff = ImportDiff::compute(&stored, &incoming);

    event_repo
        .upsert_events(&incoming)
        .await
        .map_err(ImportError::Upsert)?;

    event_repo
        .archive_events(&diff.missing_ids)
        .await
        .map_err(ImportError::Archive)?;

    Ok(GroupImport {
        group: group.to_string(),
        events_in_db: stored.len(),
        events_from_meetup: incoming.len(),
        archived_events: diff.missing_ids.len(),
    })
}
