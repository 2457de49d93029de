use axum::response::Html;
use tera::{Context, Tera};
use tracing::warn;

use warbler_db::models::{MessageRow, UserRow, UserStatsRow};
use warbler_types::models::{Message, User, UserStats, format_posted, parse_timestamp};

use crate::error::AppError;
use crate::session::Session;

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../templates/base.html")),
    ("home.html", include_str!("../templates/home.html")),
    ("home-anon.html", include_str!("../templates/home-anon.html")),
    ("messages/_list.html", include_str!("../templates/messages/_list.html")),
    ("messages/new.html", include_str!("../templates/messages/new.html")),
    ("messages/show.html", include_str!("../templates/messages/show.html")),
    ("users/signup.html", include_str!("../templates/users/signup.html")),
    ("users/login.html", include_str!("../templates/users/login.html")),
    ("users/index.html", include_str!("../templates/users/index.html")),
    ("users/detail.html", include_str!("../templates/users/detail.html")),
    ("users/show.html", include_str!("../templates/users/show.html")),
    ("users/follows.html", include_str!("../templates/users/follows.html")),
    ("users/likes.html", include_str!("../templates/users/likes.html")),
    ("users/edit.html", include_str!("../templates/users/edit.html")),
];

/// Page templates, compiled into the binary.
pub struct Templates {
    tera: Tera,
}

impl Templates {
    pub fn load() -> tera::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.iter().copied())?;
        Ok(Self { tera })
    }

    pub fn render(&self, name: &str, ctx: &Context) -> Result<Html<String>, AppError> {
        Ok(Html(self.tera.render(name, ctx)?))
    }
}

/// Context every page starts from: the navbar user and any pending flash.
pub fn page_context(session: &Session) -> Context {
    let mut ctx = Context::new();
    ctx.insert("current_user", &session.user.as_ref().map(user_view));
    ctx.insert("flash", &session.flash.map(|f| f.view()));
    ctx
}

pub fn user_view(row: &UserRow) -> User {
    User {
        id: row.id,
        username: row.username.clone(),
        email: row.email.clone(),
        image_url: row.image_url.clone(),
        header_image_url: row.header_image_url.clone(),
        bio: row.bio.clone(),
        location: row.location.clone(),
    }
}

pub fn stats_view(row: UserStatsRow) -> UserStats {
    UserStats {
        messages: row.messages,
        following: row.following,
        followers: row.followers,
        likes: row.likes,
    }
}

pub fn message_view(row: MessageRow, liked: bool) -> Message {
    let timestamp = parse_timestamp(&row.timestamp).unwrap_or_else(|| {
        warn!("Corrupt timestamp '{}' on message {}", row.timestamp, row.id);
        chrono::DateTime::default()
    });

    Message {
        id: row.id,
        posted: format_posted(&timestamp),
        timestamp,
        text: row.text,
        user_id: row.user_id,
        author_username: row.author_username,
        author_image_url: row.author_image_url,
        liked,
    }
}

/// Converts rows, marking the ones whose id is in `liked_ids`.
pub fn message_views(rows: Vec<MessageRow>, liked_ids: &[i64]) -> Vec<Message> {
    rows.into_iter()
        .map(|row| {
            let liked = liked_ids.contains(&row.id);
            message_view(row, liked)
        })
        .collect()
}
