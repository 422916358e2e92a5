use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::page::{self, PageStatus};

pub const MAX_TITLE_CHARS: usize = 120;
pub const MAX_MESSAGE_CHARS: usize = 800;
pub const MAX_PHOTOS: usize = 8;

/// Background animation rendered behind the page.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Animation {
    None,
    #[default]
    Hearts,
    Aurora,
    StarsMeteors,
}

/// How the relationship start date is rendered.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum DateDisplay {
    #[default]
    #[serde(alias = "padrao")]
    #[strum(to_string = "default", serialize = "padrao")]
    Default,
    #[strum(to_string = "counter")]
    Counter,
    #[strum(to_string = "classic")]
    Classic,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MusicKind {
    Upload,
    Youtube,
    Spotify,
}

/// Song attached to a page. `source` is a URL, a video id, a track URL or,
/// for uploads, an inline `data:` blob until the pipeline stores it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MusicReference {
    pub kind: MusicKind,
    pub source: String,
    #[serde(default)]
    pub title: String,
}

/// Pricing tier; gates photo count, music and animation.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlanType {
    Forever,
    Annual,
}

impl PlanType {
    pub fn photo_limit(self) -> usize {
        match self {
            PlanType::Forever => MAX_PHOTOS,
            PlanType::Annual => 4,
        }
    }

    pub fn includes_music(self) -> bool {
        matches!(self, PlanType::Forever)
    }

    pub fn includes_animation(self) -> bool {
        matches!(self, PlanType::Forever)
    }

    /// Customer-facing plan name.
    pub fn label(self) -> &'static str {
        match self {
            PlanType::Forever => "Para Sempre",
            PlanType::Annual => "Anual",
        }
    }
}

/// Page content authored before payment. Travels through the provider's
/// metadata channel and comes back unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct PageSubmission {
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    #[schema(value_type = String, format = Date, example = "2021-06-12")]
    pub start_date: NaiveDate,
    #[serde(default)]
    #[validate(length(max = 800))]
    pub message: String,
    #[serde(default)]
    #[validate(length(max = 8), custom = "validate_photo_refs")]
    pub photos: Vec<String>,
    #[serde(default)]
    pub music: Option<MusicReference>,
    #[serde(default)]
    pub animation: Animation,
    #[serde(default)]
    pub date_display: DateDisplay,
}

impl PageSubmission {
    /// Compact JSON used as provider metadata.
    pub fn to_metadata(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_metadata(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Applies plan entitlements and the content limits.
    pub fn restricted_to(mut self, plan: PlanType) -> Self {
        if !plan.includes_music() {
            self.music = None;
        }
        if !plan.includes_animation() {
            self.animation = Animation::None;
        }
        self.photos.truncate(plan.photo_limit());
        if self.message.chars().count() > MAX_MESSAGE_CHARS {
            self.message = self.message.chars().take(MAX_MESSAGE_CHARS).collect();
        }
        self
    }
}

fn validate_photo_refs(photos: &Vec<String>) -> Result<(), ValidationError> {
    for photo in photos {
        let ok = photo.starts_with("https://")
            || photo.starts_with("http://")
            || photo.starts_with("data:");
        if !ok {
            let mut err = ValidationError::new("photo_reference");
            err.message = Some("Photos must be http(s) URLs or data: URLs".into());
            return Err(err);
        }
    }
    Ok(())
}

/// Public view of a page record. The customer email is never exposed.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PageView {
    pub id: Uuid,
    pub title: String,
    #[schema(value_type = String, format = Date)]
    pub start_date: NaiveDate,
    pub message: String,
    pub photos: Vec<String>,
    pub music: Option<MusicReference>,
    pub animation: Animation,
    pub date_display: DateDisplay,
    #[schema(value_type = String, example = "published")]
    pub status: PageStatus,
    pub payment_id: Option<String>,
    pub plan_type: Option<PlanType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<page::Model> for PageView {
    fn from(model: page::Model) -> Self {
        let photos = model.photo_urls();
        let music = model.music_reference();
        Self {
            id: model.id,
            title: model.title,
            start_date: model.start_date,
            message: model.message,
            photos,
            music,
            animation: model.animation.parse().unwrap_or_default(),
            date_display: model.date_display.parse().unwrap_or_default(),
            status: model.status,
            payment_id: model.payment_id,
            plan_type: model.plan_type.and_then(|p| p.parse().ok()),
            created_at: model.created_at,
            updated_at: model.updated_at,
            published_at: model.published_at,
        }
    }
}
