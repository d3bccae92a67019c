//! Maintenance processors: session cleanup, external sync, activity stats,
//! image uploads. All of them are safe to run again with the same input.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, info};

use crate::domain::{
    ActivityStats, Artifact, Booking, BookingStatus, CleanupSessions, Outcome, ProcessImageUpload,
    ProcessorError, SyncExternalData, UpdateActivityStats,
};
use crate::ports::{
    AnalyticsStore, BookingStore, CatalogStore, Clock, ExternalSync, ImagePipeline, SessionStore,
};
use crate::typed::{Handler, TaskContext};

pub struct CleanupSessionsProcessor {
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl CleanupSessionsProcessor {
    pub fn new(sessions: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { sessions, clock }
    }
}

#[async_trait]
impl Handler<CleanupSessions> for CleanupSessionsProcessor {
    async fn handle(
        &self,
        task: CleanupSessions,
        _ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        let grace = Duration::hours(i64::from(task.older_than_hours.unwrap_or(0)));
        let before = self.clock.now() - grace;
        let deleted = self.sessions.delete_expired_sessions(before).await?;
        info!(deleted, %before, "expired sessions removed");
        Ok(Outcome::done().with_summary(format!("{deleted} expired sessions removed")))
    }
}

/// Pulls records changed since the last successful sync and upserts them.
/// The cursor only moves after every record is stored, so a failed run
/// repeats the same window.
pub struct SyncExternalDataProcessor {
    external: Arc<dyn ExternalSync>,
    catalog: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
}

impl SyncExternalDataProcessor {
    pub fn new(
        external: Arc<dyn ExternalSync>,
        catalog: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            external,
            catalog,
            clock,
        }
    }
}

#[async_trait]
impl Handler<SyncExternalData> for SyncExternalDataProcessor {
    async fn handle(
        &self,
        task: SyncExternalData,
        _ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        let started = self.clock.now();
        let since = self.catalog.last_synced(&task.source).await?;
        let records = self.external.pull(&task.source, since).await?;

        let mut changed = 0usize;
        for record in &records {
            if self.catalog.upsert_external(record).await? {
                changed += 1;
            }
        }
        self.catalog.set_last_synced(&task.source, started).await?;

        info!(source = %task.source, pulled = records.len(), changed, "external data synced");
        Ok(Outcome::done().with_summary(format!(
            "{} records pulled from {}, {changed} changed",
            records.len(),
            task.source
        )))
    }
}

/// Derived stats are recomputed from the bookings and overwritten.
pub struct ActivityStatsProcessor {
    bookings: Arc<dyn BookingStore>,
    analytics: Arc<dyn AnalyticsStore>,
}

impl ActivityStatsProcessor {
    pub fn new(bookings: Arc<dyn BookingStore>, analytics: Arc<dyn AnalyticsStore>) -> Self {
        Self {
            bookings,
            analytics,
        }
    }
}

pub fn compute_stats(activity_id: &str, bookings: &[Booking]) -> ActivityStats {
    let paid = || {
        bookings.iter().filter(|b| {
            matches!(
                b.status,
                BookingStatus::Confirmed | BookingStatus::Completed
            )
        })
    };
    ActivityStats {
        activity_id: activity_id.to_string(),
        total_bookings: bookings.len() as u64,
        confirmed_bookings: paid().count() as u64,
        cancelled_bookings: bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Cancelled)
            .count() as u64,
        participants: paid().map(|b| u64::from(b.quantity)).sum(),
        revenue: paid().map(|b| b.total).sum(),
    }
}

#[async_trait]
impl Handler<UpdateActivityStats> for ActivityStatsProcessor {
    async fn handle(
        &self,
        task: UpdateActivityStats,
        _ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        let activity_ids = match task.activity_id {
            Some(id) => vec![id],
            None => self.bookings.activity_ids().await?,
        };

        for activity_id in &activity_ids {
            let bookings = self.bookings.bookings_for_activity(activity_id).await?;
            let stats = compute_stats(activity_id, &bookings);
            debug!(activity_id = %activity_id, total = stats.total_bookings, "activity stats recomputed");
            self.analytics.save_activity_stats(&stats).await?;
        }
        Ok(Outcome::done().with_summary(format!(
            "stats updated for {} activities",
            activity_ids.len()
        )))
    }
}

pub struct ImageUploadProcessor {
    images: Arc<dyn ImagePipeline>,
    catalog: Arc<dyn CatalogStore>,
}

impl ImageUploadProcessor {
    pub fn new(images: Arc<dyn ImagePipeline>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { images, catalog }
    }
}

#[async_trait]
impl Handler<ProcessImageUpload> for ImageUploadProcessor {
    async fn handle(
        &self,
        task: ProcessImageUpload,
        _ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        let variants = self
            .images
            .process(&task.upload_id, &task.user_id, &task.variants)
            .await?;
        self.catalog
            .save_image_variants(&task.upload_id, &variants)
            .await?;

        let summary = format!("{} variants for upload {}", variants.len(), task.upload_id);
        Ok(variants
            .into_iter()
            .fold(Outcome::done().with_summary(summary), |outcome, v| {
                outcome.with_artifact(Artifact::Url(v.url))
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, TaskPayload};
    use crate::impls::{InMemoryDatabase, PassthroughImagePipeline, StaticExternalSync};
    use crate::ports::{ExternalRecord, FixedClock};
    use crate::typed::handler::tests::context_for;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn booking(id: &str, quantity: u32, total: i64, status: BookingStatus) -> Booking {
        Booking {
            id: id.into(),
            user_id: "U1".into(),
            activity_id: "A1".into(),
            session_id: "S1".into(),
            quantity,
            total: Money::from_minor(total),
            status,
            created_at: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
            reminded_at: None,
        }
    }

    #[tokio::test]
    async fn cleanup_respects_grace_period() {
        let clock = clock();
        let db = Arc::new(InMemoryDatabase::new());
        let now = clock.now();
        db.insert_auth_session("old", now - Duration::hours(10)).await;
        db.insert_auth_session("recent", now - Duration::hours(1)).await;
        db.insert_auth_session("live", now + Duration::hours(1)).await;

        let processor = CleanupSessionsProcessor::new(db.clone(), clock);
        let task = CleanupSessions {
            older_than_hours: Some(2),
        };
        let ctx = context_for(TaskPayload::CleanupSessions(task.clone()));
        processor.handle(task, &ctx).await.unwrap();
        assert_eq!(db.auth_session_count().await, 2);
    }

    #[tokio::test]
    async fn sync_upserts_and_advances_cursor() {
        let clock = clock();
        let db = Arc::new(InMemoryDatabase::new());
        let external = StaticExternalSync::new().with_source(
            "partner-a",
            vec![ExternalRecord {
                source: "partner-a".into(),
                external_id: "X1".into(),
                data: json!({ "title": "Pottery for kids" }),
                updated_at: clock.now() - Duration::hours(1),
            }],
        );
        let processor = SyncExternalDataProcessor::new(Arc::new(external), db.clone(), clock.clone());
        let task = SyncExternalData {
            source: "partner-a".into(),
        };
        let ctx = context_for(TaskPayload::SyncExternalData(task.clone()));

        processor.handle(task.clone(), &ctx).await.unwrap();
        assert!(db.external_record("partner-a", "X1").await.is_some());
        assert_eq!(db.last_synced("partner-a").await.unwrap(), Some(clock.now()));

        // nothing changed since the cursor
        let again = processor.handle(task, &ctx).await.unwrap();
        assert_eq!(
            again.summary.as_deref(),
            Some("0 records pulled from partner-a, 0 changed")
        );
    }

    #[tokio::test]
    async fn unknown_source_is_permanent() {
        let db = Arc::new(InMemoryDatabase::new());
        let processor =
            SyncExternalDataProcessor::new(Arc::new(StaticExternalSync::new()), db, clock());
        let task = SyncExternalData {
            source: "nowhere".into(),
        };
        let ctx = context_for(TaskPayload::SyncExternalData(task.clone()));
        assert!(processor.handle(task, &ctx).await.unwrap_err().is_permanent());
    }

    #[test]
    fn stats_count_only_paid_participants() {
        let bookings = vec![
            booking("B1", 2, 2000, BookingStatus::Confirmed),
            booking("B2", 1, 1000, BookingStatus::Completed),
            booking("B3", 4, 4000, BookingStatus::Cancelled),
            booking("B4", 1, 1000, BookingStatus::Pending),
        ];
        let stats = compute_stats("A1", &bookings);
        assert_eq!(stats.total_bookings, 4);
        assert_eq!(stats.confirmed_bookings, 2);
        assert_eq!(stats.cancelled_bookings, 1);
        assert_eq!(stats.participants, 3);
        assert_eq!(stats.revenue, Money::from_minor(3000));
    }

    #[tokio::test]
    async fn stats_rerun_yields_identical_row() {
        let db = Arc::new(InMemoryDatabase::new());
        db.insert_booking(booking("B1", 2, 2000, BookingStatus::Confirmed)).await;
        let processor = ActivityStatsProcessor::new(db.clone(), db.clone());
        let task = UpdateActivityStats::default();
        let ctx = context_for(TaskPayload::UpdateActivityStats(task.clone()));

        processor.handle(task.clone(), &ctx).await.unwrap();
        let first = db.activity_stats("A1").await.unwrap();
        processor.handle(task, &ctx).await.unwrap();
        assert_eq!(db.activity_stats("A1").await.unwrap(), first);
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn image_variants_are_saved() {
        let db = Arc::new(InMemoryDatabase::new());
        let processor =
            ImageUploadProcessor::new(Arc::new(PassthroughImagePipeline::default()), db.clone());
        let task = ProcessImageUpload {
            upload_id: "UP1".into(),
            user_id: "U1".into(),
            variants: Vec::new(),
        };
        let ctx = context_for(TaskPayload::ProcessImageUpload(task.clone()));
        let outcome = processor.handle(task, &ctx).await.unwrap();

        assert_eq!(outcome.artifacts.len(), 3);
        assert_eq!(db.image_variants("UP1").await.len(), 3);
    }
}
