use axum::{
    Extension, Form,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use warbler_types::api::MessageForm;

use crate::error::AppError;
use crate::session::{AuthUser, Session, found};
use crate::templates::{message_view, message_views, page_context, stats_view};
use crate::{AppState, blocking};

pub const MAX_MESSAGE_LEN: usize = 140;
const TIMELINE_LIMIT: u32 = 100;

/// GET / — landing page for visitors, timeline for logged-in users.
pub async fn home(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    let mut ctx = page_context(&session);

    let Some(user) = &session.user else {
        return Ok(state.templates.render("home-anon.html", &ctx)?.into_response());
    };

    let uid = user.id;
    let (rows, liked_ids, stats) = blocking(&state, move |db| -> Result<_, AppError> {
        let rows = db.timeline(uid, TIMELINE_LIMIT)?;
        let liked_ids = db.liked_message_ids(uid)?;
        let stats = db.user_stats(uid)?;
        Ok((rows, liked_ids, stats))
    })
    .await?;

    ctx.insert("messages", &message_views(rows, &liked_ids));
    ctx.insert("stats", &stats_view(stats));
    Ok(state.templates.render("home.html", &ctx)?.into_response())
}

pub async fn new_message_form(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    render_new(&state, &session, "", None)
}

/// POST /messages/new — text must be 1 to 140 characters.
pub async fn create_message(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(session): Extension<Session>,
    Form(form): Form<MessageForm>,
) -> Result<Response, AppError> {
    let text = form.text.trim().to_string();
    if text.is_empty() {
        return render_new(&state, &session, &form.text, Some("Message can't be empty."));
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return render_new(
            &state,
            &session,
            &form.text,
            Some("Messages are limited to 140 characters."),
        );
    }

    let uid = user.id;
    let message = blocking(&state, move |db| db.create_message(uid, &text)).await?;
    info!("User {} posted message {}", user.id, message.id);

    Ok(found(&format!("/users/{}", user.id)))
}

/// GET /messages/{message_id}
pub async fn show_message(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(message_id): Path<i64>,
) -> Result<Response, AppError> {
    let viewer = session.user.as_ref().map(|u| u.id);
    let (row, liked) = blocking(&state, move |db| -> Result<_, AppError> {
        let Some(row) = db.get_message(message_id)? else {
            return Err(AppError::NotFound);
        };
        let liked = match viewer {
            Some(uid) => db.liked_message_ids(uid)?.contains(&row.id),
            None => false,
        };
        Ok((row, liked))
    })
    .await?;

    let mut ctx = page_context(&session);
    ctx.insert("message", &message_view(row, liked));
    Ok(state.templates.render("messages/show.html", &ctx)?.into_response())
}

/// POST /messages/{message_id}/delete — only the author may delete.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
) -> Result<Response, AppError> {
    let uid = user.id;
    blocking(&state, move |db| -> Result<_, AppError> {
        let Some(message) = db.get_message(message_id)? else {
            return Err(AppError::NotFound);
        };
        if message.user_id != uid {
            warn!("User {} tried to delete message {} of user {}", uid, message.id, message.user_id);
            return Err(AppError::Unauthorized);
        }
        db.delete_message(message.id)?;
        Ok(())
    })
    .await?;

    info!("User {} deleted message {}", user.id, message_id);
    Ok(found(&format!("/users/{}", user.id)))
}

fn render_new(
    state: &AppState,
    session: &Session,
    text: &str,
    error: Option<&str>,
) -> Result<Response, AppError> {
    let mut ctx = page_context(session);
    ctx.insert("text", text);
    ctx.insert("error", &error);
    Ok(state.templates.render("messages/new.html", &ctx)?.into_response())
}
