//! Report processor: aggregates bookings in a window into a stored report.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{Value, json};

use crate::domain::{
    Artifact, Booking, BookingStatus, GenerateReport, Money, Outcome, ProcessorError, Report,
    ReportType,
};
use crate::ports::{AnalyticsStore, BookingStore, Clock, IdGenerator};
use crate::typed::{Handler, TaskContext};

/// Window used when the payload leaves `from` open.
pub const DEFAULT_REPORT_DAYS: i64 = 30;

pub struct ReportProcessor {
    bookings: Arc<dyn BookingStore>,
    analytics: Arc<dyn AnalyticsStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl ReportProcessor {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        analytics: Arc<dyn AnalyticsStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            bookings,
            analytics,
            clock,
            ids,
        }
    }
}

fn earns_revenue(booking: &Booking) -> bool {
    matches!(
        booking.status,
        BookingStatus::Confirmed | BookingStatus::Completed
    )
}

fn activity_stats(bookings: &[Booking]) -> Value {
    let mut per_activity: BTreeMap<&str, Vec<&Booking>> = BTreeMap::new();
    for booking in bookings {
        per_activity
            .entry(booking.activity_id.as_str())
            .or_default()
            .push(booking);
    }
    let activities: serde_json::Map<String, Value> = per_activity
        .into_iter()
        .map(|(activity_id, bookings)| {
            let confirmed = bookings.iter().filter(|b| earns_revenue(b)).count();
            let cancelled = bookings
                .iter()
                .filter(|b| b.status == BookingStatus::Cancelled)
                .count();
            let participants: u64 = bookings
                .iter()
                .filter(|b| earns_revenue(b))
                .map(|b| u64::from(b.quantity))
                .sum();
            (
                activity_id.to_string(),
                json!({
                    "bookings": bookings.len(),
                    "confirmed": confirmed,
                    "cancelled": cancelled,
                    "participants": participants,
                }),
            )
        })
        .collect();
    json!({ "totalBookings": bookings.len(), "activities": activities })
}

fn revenue_report(bookings: &[Booking]) -> Value {
    let mut by_activity: BTreeMap<&str, Money> = BTreeMap::new();
    for booking in bookings.iter().filter(|b| earns_revenue(b)) {
        let entry = by_activity
            .entry(booking.activity_id.as_str())
            .or_insert(Money::ZERO);
        *entry = *entry + booking.total;
    }
    let gross: Money = by_activity.values().copied().sum();
    let cancelled: Money = bookings
        .iter()
        .filter(|b| b.status == BookingStatus::Cancelled)
        .map(|b| b.total)
        .sum();
    json!({
        "gross": gross,
        "cancelled": cancelled,
        "paidBookings": bookings.iter().filter(|b| earns_revenue(b)).count(),
        "byActivity": by_activity,
    })
}

fn user_engagement(bookings: &[Booking]) -> Value {
    let mut per_user: BTreeMap<&str, usize> = BTreeMap::new();
    for booking in bookings {
        *per_user.entry(booking.user_id.as_str()).or_default() += 1;
    }
    let active_users = per_user.len();
    let repeat_users = per_user.values().filter(|n| **n > 1).count();
    let activities: BTreeSet<&str> = bookings.iter().map(|b| b.activity_id.as_str()).collect();
    let per_user_avg = if active_users == 0 {
        0.0
    } else {
        bookings.len() as f64 / active_users as f64
    };
    json!({
        "activeUsers": active_users,
        "repeatUsers": repeat_users,
        "bookingsPerUser": per_user_avg,
        "activitiesBooked": activities.len(),
    })
}

#[async_trait]
impl Handler<GenerateReport> for ReportProcessor {
    async fn handle(
        &self,
        task: GenerateReport,
        _ctx: &TaskContext,
    ) -> Result<Outcome, ProcessorError> {
        let now = self.clock.now();
        let to = task.to.unwrap_or(now);
        let from = task
            .from
            .unwrap_or_else(|| to - Duration::days(DEFAULT_REPORT_DAYS));
        if from >= to {
            return Err(ProcessorError::permanent(format!(
                "report window is empty ({from} .. {to})"
            )));
        }

        let bookings = self.bookings.bookings_created_between(from, to).await?;
        let data = match task.report_type {
            ReportType::ActivityStats => activity_stats(&bookings),
            ReportType::RevenueReport => revenue_report(&bookings),
            ReportType::UserEngagement => user_engagement(&bookings),
        };

        let report = Report {
            id: self.ids.generate_report_id(),
            report_type: task.report_type,
            from,
            to,
            generated_at: now,
            requested_by: task.requested_by,
            data,
        };
        self.analytics.save_report(&report).await?;

        Ok(Outcome::done()
            .with_summary(format!(
                "{} report over {} bookings",
                report.report_type.as_str(),
                bookings.len()
            ))
            .with_artifact(Artifact::Record(report.id.to_string())))
    }
}
