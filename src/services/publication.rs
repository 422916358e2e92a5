//! Paid payment event to published page, exactly once per payment id.
//!
//! The pipeline is safe to run any number of times for the same event:
//!
//! 1. an existing published record short-circuits with no side effects, a
//!    leftover draft is resumed at the publish step;
//! 2. plan entitlements are applied to the submission;
//! 3. inline blobs are uploaded under keys derived from the payment id;
//! 4. a draft is inserted carrying the payment id, which the store accepts
//!    at most once (the check-and-claim);
//! 5. the draft is conditionally published, and only the caller that made
//!    that transition sends the customer emails.

use metrics::counter;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::dto::{PaymentEvent, PaymentStatus, PlanType};
use crate::errors::ServiceError;
use crate::models::page::PageStatus;
use crate::models::PageRecord;
use crate::repositories::{NewPage, PageStore, PublishOutcome};
use crate::services::assets::{materialize_assets, AssetStore};
use crate::services::checkout::PriceList;
use crate::services::notifications::{NotificationDispatcher, PageSummary};
use crate::services::qr::qr_data_url;

#[derive(Clone, Debug)]
pub struct PublicationSettings {
    pub public_base_url: String,
    pub prices: PriceList,
}

impl PublicationSettings {
    pub fn page_url(&self, record: &PageRecord) -> String {
        format!(
            "{}/pages/{}",
            self.public_base_url.trim_end_matches('/'),
            record.id
        )
    }
}

impl From<&AppConfig> for PublicationSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            public_base_url: cfg.public_base_url.clone(),
            prices: PriceList::from(cfg),
        }
    }
}

/// How a pipeline run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum PublicationOutcome {
    /// This run published the page and sent the emails.
    Published(PageRecord),
    /// An earlier run already published the page.
    AlreadyPublished(PageRecord),
    /// A concurrent run holds the claim and has not published yet.
    InProgress(PageRecord),
}

impl PublicationOutcome {
    pub fn record(&self) -> &PageRecord {
        match self {
            PublicationOutcome::Published(r)
            | PublicationOutcome::AlreadyPublished(r)
            | PublicationOutcome::InProgress(r) => r,
        }
    }

    pub fn into_record(self) -> PageRecord {
        match self {
            PublicationOutcome::Published(r)
            | PublicationOutcome::AlreadyPublished(r)
            | PublicationOutcome::InProgress(r) => r,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PublicationOutcome::Published(_) => "published",
            PublicationOutcome::AlreadyPublished(_) => "already_published",
            PublicationOutcome::InProgress(_) => "in_progress",
        }
    }
}

#[derive(Clone)]
pub struct PublicationService {
    store: Arc<dyn PageStore>,
    assets: Arc<dyn AssetStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    settings: PublicationSettings,
}

impl PublicationService {
    pub fn new(
        store: Arc<dyn PageStore>,
        assets: Arc<dyn AssetStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: PublicationSettings,
    ) -> Self {
        Self {
            store,
            assets,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Runs the pipeline for a paid event.
    #[instrument(skip(self, event), fields(payment_id = %event.payment_id, status = %event.status))]
    pub async fn publish_paid(
        &self,
        event: &PaymentEvent,
    ) -> Result<PublicationOutcome, ServiceError> {
        let result = self.run(event).await;
        match &result {
            Ok(outcome) => {
                counter!("daylove_publications_total", 1, "outcome" => outcome.label());
                info!(page_id = %outcome.record().id, outcome = outcome.label(), "publication finished");
            }
            Err(e) => {
                counter!("daylove_publications_total", 1, "outcome" => "failed");
                error!(error = %e, "publication failed");
            }
        }
        result
    }

    async fn run(&self, event: &PaymentEvent) -> Result<PublicationOutcome, ServiceError> {
        if event.status != PaymentStatus::Paid {
            return Err(ServiceError::InvalidStatus(format!(
                "payment {} is {}, only paid payments are published",
                event.payment_id, event.status
            )));
        }
        let payment_id = event.payment_id.as_str();

        if let Some(existing) = self
            .store
            .find_by_payment_id(payment_id)
            .await
            .map_err(|e| ServiceError::publication_failed(payment_id, e))?
        {
            return match existing.status {
                PageStatus::Published | PageStatus::Expired => {
                    Ok(PublicationOutcome::AlreadyPublished(existing))
                }
                PageStatus::Draft => {
                    warn!(page_id = %existing.id, "resuming leftover draft");
                    self.finish(existing, event).await
                }
            };
        }

        let (submission, plan) = match (&event.submission, event.plan) {
            (Some(submission), Some(plan)) => (submission.clone(), plan),
            (None, _) => {
                return Err(ServiceError::publication_failed(
                    payment_id,
                    ServiceError::BadRequest("payment carries no page submission".into()),
                ))
            }
            (Some(_), None) => {
                return Err(ServiceError::publication_failed(
                    payment_id,
                    ServiceError::BadRequest("payment carries no plan".into()),
                ))
            }
        };

        let submission = submission.restricted_to(plan);
        let submission = materialize_assets(self.assets.as_ref(), payment_id, submission)
            .await
            .map_err(|e| ServiceError::publication_failed(payment_id, e))?;

        let new_page = NewPage {
            submission,
            payment_id: payment_id.to_string(),
            user_email: event.customer_email.clone(),
            plan,
        };
        let draft = match self.store.create_draft(new_page).await {
            Ok(draft) => draft,
            Err(ServiceError::Conflict(_)) => return self.lost_claim(payment_id).await,
            Err(e) => return Err(ServiceError::publication_failed(payment_id, e)),
        };

        self.finish(draft, event).await
    }

    /// Another run inserted first; report its record without side effects.
    async fn lost_claim(&self, payment_id: &str) -> Result<PublicationOutcome, ServiceError> {
        info!("payment already claimed by a concurrent run");
        match self
            .store
            .find_by_payment_id(payment_id)
            .await
            .map_err(|e| ServiceError::publication_failed(payment_id, e))?
        {
            Some(record) if record.status == PageStatus::Draft => {
                Ok(PublicationOutcome::InProgress(record))
            }
            Some(record) => Ok(PublicationOutcome::AlreadyPublished(record)),
            // the winner compensated its draft away
            None => Err(ServiceError::publication_failed(
                payment_id,
                ServiceError::Conflict(format!("claim on payment {} was released", payment_id)),
            )),
        }
    }

    async fn finish(
        &self,
        draft: PageRecord,
        event: &PaymentEvent,
    ) -> Result<PublicationOutcome, ServiceError> {
        match self.store.publish(draft.id).await {
            Ok(PublishOutcome::Transitioned(record)) => {
                self.notify(&record, event).await;
                Ok(PublicationOutcome::Published(record))
            }
            Ok(PublishOutcome::AlreadyPublished(record)) => {
                Ok(PublicationOutcome::AlreadyPublished(record))
            }
            Err(e) => {
                match self.store.discard_draft(draft.id).await {
                    Ok(removed) => warn!(page_id = %draft.id, removed, "discarded draft after publish failure"),
                    Err(discard_err) => {
                        error!(page_id = %draft.id, error = %discard_err, "could not discard draft, next retry resumes it")
                    }
                }
                Err(ServiceError::publication_failed(&event.payment_id, e))
            }
        }
    }

    async fn notify(&self, record: &PageRecord, event: &PaymentEvent) {
        let Some(recipient) = event
            .customer_email
            .as_deref()
            .or(record.user_email.as_deref())
        else {
            warn!(page_id = %record.id, "no customer email, skipping notifications");
            counter!("daylove_notifications_failed_total", 1, "kind" => "missing_recipient");
            return;
        };

        let page_url = self.settings.page_url(record);
        let qr_code = match qr_data_url(&page_url) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "could not render QR code");
                None
            }
        };
        let plan = record
            .plan_type
            .as_deref()
            .and_then(|p| p.parse().ok())
            .or(event.plan)
            .unwrap_or(PlanType::Forever);
        let summary = PageSummary {
            title: record.title.clone(),
            start_date: record.start_date,
            plan,
            amount: self.settings.prices.price(plan),
            currency: self.settings.prices.currency.clone(),
            page_url: page_url.clone(),
            qr_code,
        };

        if !self
            .notifier
            .send_page_created_email(recipient, &page_url, &summary)
            .await
        {
            error!(page_id = %record.id, "page created email failed");
            counter!("daylove_notifications_failed_total", 1, "kind" => "page_created");
        }
        if !self
            .notifier
            .send_payment_confirmation_email(recipient, &summary)
            .await
        {
            error!(page_id = %record.id, "payment confirmation email failed");
            counter!("daylove_notifications_failed_total", 1, "kind" => "payment_confirmation");
        }
    }
}
