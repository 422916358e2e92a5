use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use super::{resolve_unchanged_publish, NewPage, PageStore, PublishOutcome};
use crate::errors::ServiceError;
use crate::models::page::PageStatus;
use crate::models::PageRecord;

/// Process-local page store. Claims lock only the shard holding the
/// payment id, so unrelated payments never wait on each other.
#[derive(Debug, Default)]
pub struct InMemoryPageStore {
    pages: DashMap<Uuid, PageRecord>,
    by_payment: DashMap<String, Uuid>,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[async_trait]
impl PageStore for InMemoryPageStore {
    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<PageRecord>, ServiceError> {
        let id = match self.by_payment.get(payment_id) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self.pages.get(&id).map(|record| record.value().clone()))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<PageRecord>, ServiceError> {
        Ok(self.pages.get(&id).map(|record| record.value().clone()))
    }

    async fn create_draft(&self, page: NewPage) -> Result<PageRecord, ServiceError> {
        match self.by_payment.entry(page.payment_id.clone()) {
            Entry::Occupied(_) => Err(ServiceError::Conflict(format!(
                "payment {} already has a page",
                page.payment_id
            ))),
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4();
                let record = page.into_model(id, Utc::now());
                self.pages.insert(id, record.clone());
                slot.insert(id);
                Ok(record)
            }
        }
    }

    async fn publish(&self, id: Uuid) -> Result<PublishOutcome, ServiceError> {
        if let Some(mut record) = self.pages.get_mut(&id) {
            if record.status == PageStatus::Draft {
                let now = Utc::now();
                record.status = PageStatus::Published;
                record.published_at = Some(now);
                record.updated_at = now;
                return Ok(PublishOutcome::Transitioned(record.clone()));
            }
        }
        resolve_unchanged_publish(id, self.pages.get(&id).map(|r| r.value().clone()))
    }

    async fn discard_draft(&self, id: Uuid) -> Result<bool, ServiceError> {
        let removed = self
            .pages
            .remove_if(&id, |_, record| record.status == PageStatus::Draft);
        if let Some((_, record)) = &removed {
            if let Some(payment_id) = &record.payment_id {
                self.by_payment.remove_if(payment_id, |_, claimed| *claimed == id);
            }
        }
        Ok(removed.is_some())
    }
}
