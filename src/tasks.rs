use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::mailer::Mailer;
use crate::model::Booking;

/// One queued notification, fully resolved at schedule time so delivery
/// needs no further state lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTask {
    Confirmation { to: String, court: String, start_time: DateTime<Utc>, duration: i64 },
    Reminder { to: String, court: String, start_time: DateTime<Utc>, duration: i64 },
    BookingChanged { to: String, court: String, start_time: DateTime<Utc>, duration: i64 },
    Cancellation { to: String, court: String, start_time: DateTime<Utc>, duration: i64 },
    AdminNotice { to: Vec<String>, booking: String },
    AdminCancelNotice { to: Vec<String>, booking: String },
    WorkerCleanup { to: Vec<String>, court: String },
}

fn when(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

impl NotificationTask {
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationTask::Confirmation { .. } => "Booking Confirmation",
            NotificationTask::Reminder { .. } => "Booking Reminder",
            NotificationTask::BookingChanged { .. } => "Booking Changed",
            NotificationTask::Cancellation { .. } => "Booking Cancellation",
            NotificationTask::AdminNotice { .. } => "New Booking",
            NotificationTask::AdminCancelNotice { .. } => "Booking Cancelled",
            NotificationTask::WorkerCleanup { .. } => "Cleaning Reminder",
        }
    }

    pub fn body(&self) -> String {
        match self {
            NotificationTask::Confirmation { court, start_time, duration, .. }
            | NotificationTask::Reminder { court, start_time, duration, .. } => {
                format!(
                    "You have booked {court} from {} for {duration} hours",
                    when(start_time)
                )
            }
            NotificationTask::BookingChanged { court, start_time, duration, .. } => {
                format!(
                    "Your booking for {court} has been moved to {} for {duration} hours",
                    when(start_time)
                )
            }
            NotificationTask::Cancellation { court, start_time, .. } => {
                format!("Your booking for {court} at {} has been cancelled", when(start_time))
            }
            NotificationTask::AdminNotice { booking, .. } => {
                format!("New booking: {booking}")
            }
            NotificationTask::AdminCancelNotice { booking, .. } => {
                format!("Booking cancelled: {booking}")
            }
            NotificationTask::WorkerCleanup { court, .. } => {
                format!("You are reminded to clean {court} for 10 minutes")
            }
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        match self {
            NotificationTask::Confirmation { to, .. }
            | NotificationTask::Reminder { to, .. }
            | NotificationTask::BookingChanged { to, .. }
            | NotificationTask::Cancellation { to, .. } => vec![to.clone()],
            NotificationTask::AdminNotice { to, .. }
            | NotificationTask::AdminCancelNotice { to, .. }
            | NotificationTask::WorkerCleanup { to, .. } => to.clone(),
        }
    }
}

/// When the pre-booking reminder fires: 12 hours before the start.
pub fn reminder_eta(booking: &Booking) -> DateTime<Utc> {
    booking.start_time - Duration::hours(12)
}

/// When the worker cleanup reminder fires: 2 minutes after the triggering
/// event, regardless of when the booking itself ends.
pub fn cleanup_eta(event_time: DateTime<Utc>) -> DateTime<Utc> {
    event_time + Duration::minutes(2)
}

/// Fire-and-forget delayed delivery. Each scheduled task is a detached tokio
/// task sleeping until its ETA; nothing survives a process restart, and a
/// delivery failure only ever produces a log line.
pub struct Scheduler {
    mailer: Arc<dyn Mailer>,
}

impl Scheduler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Deliver as soon as the runtime gets to it.
    pub fn enqueue(&self, task: NotificationTask) {
        self.schedule(task, Utc::now());
    }

    /// Deliver at `run_at`; an ETA in the past means "now".
    pub fn schedule(&self, task: NotificationTask, run_at: DateTime<Utc>) {
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            let delay = (run_at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            deliver(mailer.as_ref(), &task).await;
        });
    }
}

async fn deliver(mailer: &dyn Mailer, task: &NotificationTask) {
    let to = task.recipients();
    if to.is_empty() {
        debug!(task = task.subject(), "no recipients, skipping");
        return;
    }
    match mailer.send(&to, task.subject(), &task.body()).await {
        Ok(()) => {
            metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL).increment(1);
        }
        Err(e) => {
            metrics::counter!(crate::observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
            warn!(task = task.subject(), error = %e, "notification delivery failed");
        }
    }
}
