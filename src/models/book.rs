//! Book model and related types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use sqlx::FromRow;

pub const MAX_RATING: i16 = 5;
/// Column width of `title` and `author`
pub const MAX_TEXT_LENGTH: usize = 255;

/// Uploader summary embedded in book responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uploader {
    pub id: i32,
    pub name: String,
    pub email: String,
}

/// Internal row structure for book queries joined with the uploader
#[derive(Debug, Clone, FromRow)]
pub struct BookRow {
    id: i32,
    title: String,
    author: String,
    description: Option<String>,
    thumbnail: Option<String>,
    rating: i16,
    uploader_id: i32,
    uploaded_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    uploader_name: String,
    uploader_email: String,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Book {
            id: row.id,
            title: row.title,
            author: row.author,
            description: row.description,
            thumbnail: row.thumbnail,
            rating: row.rating,
            uploader_id: row.uploader_id,
            uploaded_at: row.uploaded_at,
            updated_at: row.updated_at,
            uploader: Uploader {
                id: row.uploader_id,
                name: row.uploader_name,
                email: row.uploader_email,
            },
        }
    }
}

/// Book with its uploader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    /// Public path of the thumbnail image (`/uploads/...`)
    pub thumbnail: Option<String>,
    /// 0 to 5 stars
    pub rating: i16,
    pub uploader_id: i32,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub uploader: Uploader,
}

impl Book {
    pub fn is_owned_by(&self, user_id: i32) -> bool {
        self.uploader_id == user_id
    }
}

/// Book listing filters
#[serde_as]
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BookQuery {
    /// Substring match on title or author
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub search: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub title: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub author: Option<String>,
    /// Exact rating
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub rating: Option<i16>,
    /// Rating lower bound, inclusive
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default, alias = "minRating")]
    pub min_rating: Option<i16>,
    /// Upload day (YYYY-MM-DD)
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Uploader user id
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub uploader: Option<i32>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub page: Option<i64>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Fields for a new book (thumbnail handled separately)
#[derive(Debug, Clone)]
pub struct CreateBook {
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub rating: i16,
    pub thumbnail: Option<String>,
}

/// Partial book update
#[derive(Debug, Clone, Default)]
pub struct UpdateBook {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub rating: Option<i16>,
}

/// What to do with the stored thumbnail on update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailChange {
    Keep,
    Replace(String),
    Clear,
}

/// Parse a rating form value, accepting `4` as well as `4.0`
pub fn parse_rating(raw: &str) -> Option<i16> {
    let raw = raw.trim();
    let value = raw
        .parse::<i16>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i16))?;
    (0..=MAX_RATING).contains(&value).then_some(value)
}
