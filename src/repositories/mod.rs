use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::dto::{PageSubmission, PlanType};
use crate::errors::ServiceError;
use crate::models::page::{self, PageStatus};
use crate::models::PageRecord;

pub mod memory;
pub mod page_repository;

pub use memory::InMemoryPageStore;
pub use page_repository::PageRepository;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// A draft page claiming a provider payment id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewPage {
    pub submission: PageSubmission,
    pub payment_id: String,
    pub user_email: Option<String>,
    pub plan: PlanType,
}

impl NewPage {
    pub(crate) fn into_model(self, id: Uuid, now: DateTime<Utc>) -> PageRecord {
        let submission = self.submission;
        page::Model {
            id,
            title: submission.title,
            message: submission.message,
            start_date: submission.start_date,
            date_display: submission.date_display.to_string(),
            animation: submission.animation.to_string(),
            photos: serde_json::Value::from(submission.photos),
            music: submission
                .music
                .and_then(|music| serde_json::to_value(music).ok()),
            status: PageStatus::Draft,
            payment_id: Some(self.payment_id),
            user_email: self.user_email,
            plan_type: Some(self.plan.to_string()),
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }
}

/// Result of the conditional `draft -> published` transition.
#[derive(Clone, Debug, PartialEq)]
pub enum PublishOutcome {
    /// This call performed the transition.
    Transitioned(PageRecord),
    /// Someone else already published the record.
    AlreadyPublished(PageRecord),
}

impl PublishOutcome {
    pub fn record(&self) -> &PageRecord {
        match self {
            PublishOutcome::Transitioned(record) | PublishOutcome::AlreadyPublished(record) => {
                record
            }
        }
    }

    pub fn into_record(self) -> PageRecord {
        match self {
            PublishOutcome::Transitioned(record) | PublishOutcome::AlreadyPublished(record) => {
                record
            }
        }
    }
}

/// Durable storage for page records.
///
/// `create_draft` is the check-and-claim: it must fail with
/// [`ServiceError::Conflict`] when another record already carries the
/// payment id, atomically with respect to concurrent callers.
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn find_by_payment_id(&self, payment_id: &str)
        -> Result<Option<PageRecord>, ServiceError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<PageRecord>, ServiceError>;

    async fn create_draft(&self, page: NewPage) -> Result<PageRecord, ServiceError>;

    /// Moves a draft to `published`; a no-op for already published records.
    async fn publish(&self, id: Uuid) -> Result<PublishOutcome, ServiceError>;

    /// Deletes a record only while it is still a draft. Returns whether a row was removed.
    async fn discard_draft(&self, id: Uuid) -> Result<bool, ServiceError>;
}

/// Shared follow-up for a publish that changed nothing.
pub(crate) fn resolve_unchanged_publish(
    id: Uuid,
    current: Option<PageRecord>,
) -> Result<PublishOutcome, ServiceError> {
    match current {
        Some(record) if record.status == PageStatus::Published => {
            Ok(PublishOutcome::AlreadyPublished(record))
        }
        Some(record) => Err(ServiceError::InvalidStatus(format!(
            "page {} is {} and cannot be published",
            id, record.status
        ))),
        None => Err(ServiceError::NotFound(format!("page {} not found", id))),
    }
}
