use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Template-facing user. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub image_url: String,
    pub header_image_url: String,
    pub bio: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UserStats {
    pub messages: i64,
    pub following: i64,
    pub followers: i64,
    pub likes: i64,
}

/// A user row in a listing, with whether the viewer already follows them.
#[derive(Debug, Clone, Serialize)]
pub struct UserCard {
    pub user: User,
    pub followed_by_viewer: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub user_id: i64,
    pub author_username: String,
    pub author_image_url: String,
    pub timestamp: DateTime<Utc>,
    /// Human readable form of `timestamp`, e.g. "19 October 2026".
    pub posted: String,
    pub liked: bool,
}

/// SQLite hands timestamps back as "YYYY-MM-DD HH:MM:SS[.fff]" without a
/// zone; they are always written in UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

pub fn format_posted(ts: &DateTime<Utc>) -> String {
    ts.format("%d %B %Y").to_string()
}
