use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dto::MusicReference;

/// Publication state of a page.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PageStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "published")]
    Published,
    #[sea_orm(string_value = "expired")]
    Expired,
}

/// The `pages` table. At most one row per non-null `payment_id`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub start_date: NaiveDate,
    pub date_display: String,
    pub animation: String,
    /// JSON array of photo URLs
    #[sea_orm(column_type = "Json")]
    pub photos: Json,
    #[sea_orm(column_type = "Json", nullable)]
    pub music: Option<Json>,
    pub status: PageStatus,
    #[sea_orm(unique)]
    pub payment_id: Option<String>,
    pub user_email: Option<String>,
    pub plan_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn photo_urls(&self) -> Vec<String> {
        serde_json::from_value(self.photos.clone()).unwrap_or_default()
    }

    pub fn music_reference(&self) -> Option<MusicReference> {
        self.music
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn is_published(&self) -> bool {
        self.status == PageStatus::Published
    }
}
