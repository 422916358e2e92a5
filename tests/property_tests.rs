//! Property-based tests for DayLove invariants.
//!
//! These cover plan entitlements, price conversion, webhook signatures and
//! the idempotency of the publication pipeline across generated inputs.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;

use daylove_api::{
    dto::{
        Animation, DateDisplay, MusicKind, MusicReference, PageSubmission, PaymentEvent,
        PaymentStatus, PlanType,
    },
    repositories::{InMemoryPageStore, PageStore},
    services::{
        assets::InMemoryAssetStore,
        checkout::{to_minor_units, PriceList},
        notifications::{NotificationDispatcher, PageSummary},
        PublicationService, PublicationSettings,
    },
    webhooks::{SignatureGenerator, WebhookVerifier},
};

const HEADER: &str = "x-hub-signature";

fn plan_strategy() -> impl Strategy<Value = PlanType> {
    prop_oneof![Just(PlanType::Forever), Just(PlanType::Annual)]
}

fn animation_strategy() -> impl Strategy<Value = Animation> {
    prop_oneof![
        Just(Animation::None),
        Just(Animation::Hearts),
        Just(Animation::Aurora),
        Just(Animation::StarsMeteors),
    ]
}

fn submission_strategy() -> impl Strategy<Value = PageSubmission> {
    (
        "[A-Za-z &]{1,40}",
        0usize..=8,
        any::<bool>(),
        animation_strategy(),
        ".{0,1000}",
    )
        .prop_map(|(title, photos, with_music, animation, message)| PageSubmission {
            title,
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            message,
            photos: (0..photos)
                .map(|i| format!("https://cdn.daylove.test/{}.jpg", i))
                .collect(),
            music: with_music.then(|| MusicReference {
                kind: MusicKind::Spotify,
                source: "https://open.spotify.com/track/1".to_string(),
                title: String::new(),
            }),
            animation,
            date_display: DateDisplay::Default,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn restricted_submission_respects_plan(
        submission in submission_strategy(),
        plan in plan_strategy(),
    ) {
        let original = submission.clone();
        let restricted = submission.restricted_to(plan);

        prop_assert_eq!(
            restricted.photos.len(),
            original.photos.len().min(plan.photo_limit())
        );
        prop_assert_eq!(&restricted.photos[..], &original.photos[..restricted.photos.len()]);
        prop_assert!(restricted.message.chars().count() <= 800);
        if plan == PlanType::Annual {
            prop_assert!(restricted.music.is_none());
            prop_assert_eq!(restricted.animation, Animation::None);
        } else {
            prop_assert_eq!(restricted.music, original.music);
            prop_assert_eq!(restricted.animation, original.animation);
        }
        prop_assert_eq!(restricted.title, original.title);
    }

    #[test]
    fn submission_survives_metadata_channel(submission in submission_strategy()) {
        let raw = submission.to_metadata().unwrap();
        prop_assert_eq!(PageSubmission::from_metadata(&raw).unwrap(), submission);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn minor_units_match_cent_precision(cents in 0i64..100_000_000) {
        let amount = Decimal::new(cents, 2);
        prop_assert_eq!(to_minor_units(amount).unwrap(), cents);
    }

    #[test]
    fn minor_units_round_half_away_from_zero(cents in 0i64..10_000_000, tenth in 0i64..10) {
        let amount = Decimal::new(cents * 10 + tenth, 3);
        let expected = if tenth >= 5 { cents + 1 } else { cents };
        prop_assert_eq!(to_minor_units(amount).unwrap(), expected);
    }

    #[test]
    fn signed_bodies_verify(body in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let secret = "whsec_prop";
        let verifier = WebhookVerifier::new(Some(secret.to_string()), false, HEADER);
        let mut headers = HeaderMap::new();
        let signature = SignatureGenerator::new(secret).sign(&body);
        headers.insert(HEADER, HeaderValue::from_str(&signature).unwrap());

        prop_assert!(verifier.verify(&headers, &body).is_ok());
    }

    #[test]
    fn any_altered_byte_is_rejected(
        body in proptest::collection::vec(any::<u8>(), 1..512),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let secret = "whsec_prop";
        let verifier = WebhookVerifier::new(Some(secret.to_string()), false, HEADER);
        let mut headers = HeaderMap::new();
        let signature = SignatureGenerator::new(secret).sign(&body);
        headers.insert(HEADER, HeaderValue::from_str(&signature).unwrap());

        let mut tampered = body.clone();
        let at = index.index(tampered.len());
        tampered[at] ^= flip;
        prop_assert!(verifier.verify(&headers, &tampered).is_err());
    }
}

#[derive(Default)]
struct CountingDispatcher {
    sent: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl NotificationDispatcher for CountingDispatcher {
    async fn send_page_created_email(&self, _: &str, _: &str, _: &PageSummary) -> bool {
        self.sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        true
    }

    async fn send_payment_confirmation_email(&self, _: &str, _: &PageSummary) -> bool {
        true
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn repeated_deliveries_publish_one_capped_page(
        submission in submission_strategy(),
        plan in plan_strategy(),
        deliveries in 1usize..5,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = Arc::new(InMemoryPageStore::new());
        let notifier = Arc::new(CountingDispatcher::default());
        let publication = PublicationService::new(
            store.clone(),
            Arc::new(InMemoryAssetStore::new()),
            notifier.clone(),
            PublicationSettings {
                public_base_url: "https://daylove.test".to_string(),
                prices: PriceList {
                    forever: Decimal::new(2990, 2),
                    annual: Decimal::new(1990, 2),
                    currency: "BRL".to_string(),
                },
            },
        );
        let event = PaymentEvent {
            payment_id: "pay_prop".to_string(),
            status: PaymentStatus::Paid,
            customer_email: Some("ana@example.com".to_string()),
            submission: Some(submission.clone()),
            plan: Some(plan),
            raw: serde_json::Value::Null,
        };

        let record = rt.block_on(async {
            for _ in 0..deliveries {
                publication.publish_paid(&event).await.unwrap();
            }
            store.find_by_payment_id("pay_prop").await.unwrap().unwrap()
        });

        prop_assert_eq!(store.len(), 1);
        prop_assert_eq!(notifier.sent.load(std::sync::atomic::Ordering::SeqCst), 1);
        prop_assert_eq!(
            record.photo_urls().len(),
            submission.photos.len().min(plan.photo_limit())
        );
    }
}
