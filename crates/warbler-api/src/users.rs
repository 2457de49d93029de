use axum::{
    Extension, Form,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tera::Context;
use tracing::{info, warn};

use warbler_db::Database;
use warbler_db::models::{UserRow, UserStatsRow, UserUpdate};
use warbler_types::api::{ProfileForm, SearchQuery, non_blank};
use warbler_types::flash::Flash;
use warbler_types::models::UserCard;

use crate::auth::verify_password;
use crate::error::AppError;
use crate::session::{AuthUser, SESSION_COOKIE, Session, flash_cookie, found, removal_cookie};
use crate::templates::{message_views, page_context, stats_view, user_view};
use crate::{AppState, blocking};

const PROFILE_MESSAGE_LIMIT: u32 = 100;

/// A user page header: the user, their counters, and whether the viewer follows them.
struct Profile {
    user: UserRow,
    stats: UserStatsRow,
    viewer_follows: bool,
}

fn load_profile(db: &Database, viewer: Option<i64>, user_id: i64) -> Result<Profile, AppError> {
    let user = db.get_user(user_id)?.ok_or(AppError::NotFound)?;
    let stats = db.user_stats(user_id)?;
    let viewer_follows = match viewer {
        Some(vid) => db.is_following(vid, user_id)?,
        None => false,
    };
    Ok(Profile {
        user,
        stats,
        viewer_follows,
    })
}

fn profile_context(session: &Session, profile: &Profile) -> Context {
    let mut ctx = page_context(session);
    ctx.insert("user", &user_view(&profile.user));
    ctx.insert("stats", &stats_view(profile.stats));
    ctx.insert("viewer_follows", &profile.viewer_follows);
    ctx
}

fn user_cards(rows: &[UserRow], viewer_following: &[i64]) -> Vec<UserCard> {
    rows.iter()
        .map(|row| UserCard {
            user: user_view(row),
            followed_by_viewer: viewer_following.contains(&row.id),
        })
        .collect()
}

fn viewer_id(session: &Session) -> Option<i64> {
    session.user.as_ref().map(|u| u.id)
}

/// GET /users?q= — everyone, or usernames containing `q`.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, AppError> {
    let q = non_blank(&query.q).map(str::to_string);
    let viewer = viewer_id(&session);

    let search = q.clone();
    let (rows, following) = blocking(&state, move |db| -> Result<_, AppError> {
        let rows = db.list_users(search.as_deref())?;
        let following = match viewer {
            Some(vid) => db.following_ids(vid)?,
            None => Vec::new(),
        };
        Ok((rows, following))
    })
    .await?;

    let mut ctx = page_context(&session);
    ctx.insert("users", &user_cards(&rows, &following));
    ctx.insert("q", &q);
    Ok(state.templates.render("users/index.html", &ctx)?.into_response())
}

/// GET /users/{user_id} — profile with the user's messages.
pub async fn show_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<i64>,
) -> Result<Response, AppError> {
    let viewer = viewer_id(&session);
    let (profile, rows, liked_ids) = blocking(&state, move |db| -> Result<_, AppError> {
        let profile = load_profile(db, viewer, user_id)?;
        let rows = db.messages_for_user(user_id, PROFILE_MESSAGE_LIMIT)?;
        let liked_ids = match viewer {
            Some(vid) => db.liked_message_ids(vid)?,
            None => Vec::new(),
        };
        Ok((profile, rows, liked_ids))
    })
    .await?;

    let mut ctx = profile_context(&session, &profile);
    ctx.insert("messages", &message_views(rows, &liked_ids));
    Ok(state.templates.render("users/show.html", &ctx)?.into_response())
}

/// GET /users/{user_id}/following
pub async fn show_following(
    State(state): State<AppState>,
    Extension(AuthUser(viewer)): Extension<AuthUser>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<i64>,
) -> Result<Response, AppError> {
    render_follows(&state, &session, viewer.id, user_id, FollowList::Following).await
}

/// GET /users/{user_id}/followers
pub async fn show_followers(
    State(state): State<AppState>,
    Extension(AuthUser(viewer)): Extension<AuthUser>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<i64>,
) -> Result<Response, AppError> {
    render_follows(&state, &session, viewer.id, user_id, FollowList::Followers).await
}

#[derive(Clone, Copy)]
enum FollowList {
    Following,
    Followers,
}

async fn render_follows(
    state: &AppState,
    session: &Session,
    viewer: i64,
    user_id: i64,
    list: FollowList,
) -> Result<Response, AppError> {
    let (profile, rows, following) = blocking(state, move |db| -> Result<_, AppError> {
        let profile = load_profile(db, Some(viewer), user_id)?;
        let rows = match list {
            FollowList::Following => db.following(user_id)?,
            FollowList::Followers => db.followers(user_id)?,
        };
        let following = db.following_ids(viewer)?;
        Ok((profile, rows, following))
    })
    .await?;

    let heading = match list {
        FollowList::Following => "Following",
        FollowList::Followers => "Followers",
    };

    let mut ctx = profile_context(session, &profile);
    ctx.insert("heading", heading);
    ctx.insert("users", &user_cards(&rows, &following));
    Ok(state.templates.render("users/follows.html", &ctx)?.into_response())
}

/// GET /users/{user_id}/likes
pub async fn show_likes(
    State(state): State<AppState>,
    Extension(AuthUser(viewer)): Extension<AuthUser>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<i64>,
) -> Result<Response, AppError> {
    let vid = viewer.id;
    let (profile, rows, liked_ids) = blocking(&state, move |db| -> Result<_, AppError> {
        let profile = load_profile(db, Some(vid), user_id)?;
        let rows = db.liked_messages(user_id)?;
        let liked_ids = db.liked_message_ids(vid)?;
        Ok((profile, rows, liked_ids))
    })
    .await?;

    let mut ctx = profile_context(&session, &profile);
    ctx.insert("messages", &message_views(rows, &liked_ids));
    Ok(state.templates.render("users/likes.html", &ctx)?.into_response())
}

/// POST /users/follow/{follow_id}
pub async fn follow(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    jar: CookieJar,
    Path(follow_id): Path<i64>,
) -> Result<Response, AppError> {
    if follow_id == user.id {
        let jar = jar.add(flash_cookie(Flash::CannotFollowSelf));
        return Ok((jar, found(&format!("/users/{}", user.id))).into_response());
    }

    let uid = user.id;
    let added = blocking(&state, move |db| -> Result<_, AppError> {
        db.get_user(follow_id)?.ok_or(AppError::NotFound)?;
        Ok(db.follow(uid, follow_id)?)
    })
    .await?;

    if added {
        info!("User {} followed user {}", uid, follow_id);
    }
    Ok(found(&format!("/users/{}/following", uid)))
}

/// POST /users/stop-following/{follow_id}
pub async fn stop_following(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(follow_id): Path<i64>,
) -> Result<Response, AppError> {
    let uid = user.id;
    let removed = blocking(&state, move |db| -> Result<_, AppError> {
        db.get_user(follow_id)?.ok_or(AppError::NotFound)?;
        Ok(db.unfollow(uid, follow_id)?)
    })
    .await?;

    if removed {
        info!("User {} stopped following user {}", uid, follow_id);
    }
    Ok(found(&format!("/users/{}/following", uid)))
}

/// Values echoed back into the edit form.
#[derive(Debug, Default, Serialize)]
struct ProfileFields {
    username: String,
    email: String,
    image_url: String,
    header_image_url: String,
    bio: String,
    location: String,
}

impl ProfileFields {
    fn from_user(user: &UserRow) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            image_url: user.image_url.clone(),
            header_image_url: user.header_image_url.clone(),
            bio: user.bio.clone().unwrap_or_default(),
            location: user.location.clone().unwrap_or_default(),
        }
    }

    fn from_form(form: &ProfileForm) -> Self {
        Self {
            username: form.username.clone(),
            email: form.email.clone(),
            image_url: form.image_url.clone().unwrap_or_default(),
            header_image_url: form.header_image_url.clone().unwrap_or_default(),
            bio: form.bio.clone().unwrap_or_default(),
            location: form.location.clone().unwrap_or_default(),
        }
    }
}

/// GET /users/profile
pub async fn profile_form(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    render_edit(&state, &session, &ProfileFields::from_user(&user), None)
}

/// POST /users/profile — changes are confirmed with the current password.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Extension(session): Extension<Session>,
    jar: CookieJar,
    Form(form): Form<ProfileForm>,
) -> Result<Response, AppError> {
    let fields = ProfileFields::from_form(&form);

    let password = form.password.clone();
    let hash = user.password.clone();
    let password_ok = blocking(&state, move |_db| verify_password(&password, &hash)).await?;
    if !password_ok {
        warn!("Profile update for user {} with wrong password", user.id);
        return render_edit(&state, &session, &fields, Some("Wrong password, please try again."));
    }

    let username = form.username.trim().to_string();
    let email = form.email.trim().to_string();
    if username.is_empty() || email.is_empty() {
        return render_edit(&state, &session, &fields, Some("Username and email are required."));
    }

    let image_url = non_blank(&form.image_url).map(str::to_string);
    let header_image_url = non_blank(&form.header_image_url).map(str::to_string);
    let bio = non_blank(&form.bio).map(str::to_string);
    let location = non_blank(&form.location).map(str::to_string);

    let uid = user.id;
    let result = blocking(&state, move |db| {
        db.update_user(
            uid,
            &UserUpdate {
                username: &username,
                email: &email,
                image_url: image_url.as_deref(),
                header_image_url: header_image_url.as_deref(),
                bio: bio.as_deref(),
                location: location.as_deref(),
            },
        )
    })
    .await;

    match result {
        Ok(updated) => {
            info!("User {} updated profile (@{})", updated.id, updated.username);
            let jar = jar.add(flash_cookie(Flash::ProfileUpdated));
            Ok((jar, found(&format!("/users/{}", updated.id))).into_response())
        }
        Err(e) if e.is_integrity() => {
            warn!("Profile update rejected: {}", e);
            render_edit(&state, &session, &fields, Some("Username or email already taken."))
        }
        Err(e) => Err(e),
    }
}

/// POST /users/delete — removes the account and everything it owns.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let uid = user.id;
    blocking(&state, move |db| db.delete_user(uid)).await?;
    info!("Deleted user {} (@{})", user.id, user.username);

    let jar = jar
        .remove(removal_cookie(SESSION_COOKIE))
        .add(flash_cookie(Flash::AccountDeleted));
    Ok((jar, found("/signup")).into_response())
}

fn render_edit(
    state: &AppState,
    session: &Session,
    fields: &ProfileFields,
    error: Option<&str>,
) -> Result<Response, AppError> {
    let mut ctx = page_context(session);
    ctx.insert("form", fields);
    ctx.insert("error", &error);
    Ok(state.templates.render("users/edit.html", &ctx)?.into_response())
}
