use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, QueryFilter, SqlErr,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{resolve_unchanged_publish, BaseRepository, NewPage, PageStore, PublishOutcome};
use crate::errors::ServiceError;
use crate::models::page::{Column, Entity as Page, PageStatus};
use crate::models::PageRecord;
use crate::repositories::Repository;

/// Page store backed by the `pages` table; the unique index on
/// `payment_id` arbitrates concurrent claims.
#[derive(Debug, Clone)]
pub struct PageRepository {
    base: BaseRepository,
}

impl PageRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

fn map_insert_error(payment_id: &str, err: DbErr) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            debug!(payment_id, detail = %detail, "payment id already claimed");
            ServiceError::Conflict(format!("payment {} already has a page", payment_id))
        }
        _ => ServiceError::DatabaseError(err),
    }
}

#[async_trait]
impl PageStore for PageRepository {
    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<PageRecord>, ServiceError> {
        Page::find()
            .filter(Column::PaymentId.eq(payment_id))
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<PageRecord>, ServiceError> {
        Page::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn create_draft(&self, page: NewPage) -> Result<PageRecord, ServiceError> {
        let payment_id = page.payment_id.clone();
        let model = page.into_model(Uuid::new_v4(), Utc::now());

        model
            .into_active_model()
            .reset_all()
            .insert(self.base.get_db())
            .await
            .map_err(|e| map_insert_error(&payment_id, e))
    }

    async fn publish(&self, id: Uuid) -> Result<PublishOutcome, ServiceError> {
        let now = Utc::now();
        let result = Page::update_many()
            .col_expr(Column::Status, Expr::value(PageStatus::Published))
            .col_expr(Column::PublishedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(PageStatus::Draft))
            .exec(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?;

        let current = self.get_by_id(id).await?;
        if result.rows_affected == 1 {
            return current.map(PublishOutcome::Transitioned).ok_or_else(|| {
                warn!(page_id = %id, "published page vanished before re-read");
                ServiceError::NotFound(format!("page {} not found", id))
            });
        }
        resolve_unchanged_publish(id, current)
    }

    async fn discard_draft(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = Page::delete_many()
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(PageStatus::Draft))
            .exec(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection, run_migrations};
    use crate::dto::{Animation, DateDisplay, PageSubmission, PlanType};
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    async fn repository() -> PageRepository {
        let pool = establish_connection("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        PageRepository::new(Arc::new(pool))
    }

    fn new_page(payment_id: &str) -> NewPage {
        NewPage {
            submission: PageSubmission {
                title: "A & B".into(),
                start_date: NaiveDate::from_ymd_opt(2019, 5, 4).unwrap(),
                message: "para sempre".into(),
                photos: vec!["https://cdn.test/1.jpg".into()],
                music: None,
                animation: Animation::None,
                date_display: DateDisplay::Classic,
            },
            payment_id: payment_id.into(),
            user_email: Some("ana@example.com".into()),
            plan: PlanType::Annual,
        }
    }

    #[tokio::test]
    async fn draft_round_trips_through_the_table() {
        let repo = repository().await;
        let created = repo.create_draft(new_page("pay_1")).await.unwrap();
        assert_eq!(created.status, PageStatus::Draft);

        let found = repo.find_by_payment_id("pay_1").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.photo_urls(), vec!["https://cdn.test/1.jpg"]);
        assert_eq!(found.plan_type.as_deref(), Some("annual"));
        assert_eq!(found.date_display, "classic");
    }

    #[tokio::test]
    async fn second_claim_on_payment_id_conflicts() {
        let repo = repository().await;
        repo.create_draft(new_page("pay_dup")).await.unwrap();
        assert_matches!(
            repo.create_draft(new_page("pay_dup")).await,
            Err(ServiceError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn publish_transitions_once() {
        let repo = repository().await;
        let draft = repo.create_draft(new_page("pay_2")).await.unwrap();

        let first = repo.publish(draft.id).await.unwrap();
        assert_matches!(first, PublishOutcome::Transitioned(ref r) if r.published_at.is_some());

        let second = repo.publish(draft.id).await.unwrap();
        assert_matches!(second, PublishOutcome::AlreadyPublished(_));
    }

    #[tokio::test]
    async fn discard_only_removes_drafts() {
        let repo = repository().await;
        let draft = repo.create_draft(new_page("pay_3")).await.unwrap();
        let other = repo.create_draft(new_page("pay_4")).await.unwrap();
        repo.publish(other.id).await.unwrap();

        assert!(repo.discard_draft(draft.id).await.unwrap());
        assert!(!repo.discard_draft(other.id).await.unwrap());
        assert!(repo.get_by_id(draft.id).await.unwrap().is_none());
        assert!(repo.get_by_id(other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn publishing_unknown_page_is_not_found() {
        let repo = repository().await;
        assert_matches!(
            repo.publish(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
