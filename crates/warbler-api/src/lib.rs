pub mod auth;
pub mod error;
pub mod likes;
pub mod messages;
pub mod session;
pub mod templates;
pub mod users;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tracing::error;

use warbler_db::Database;

use crate::error::AppError;
use crate::session::{load_session, require_user};
use crate::templates::Templates;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub secret_key: String,
    pub templates: Templates,
}

impl AppStateInner {
    pub fn new(db: Database, secret_key: String) -> Result<AppState, AppError> {
        Ok(Arc::new(Self {
            db,
            secret_key,
            templates: Templates::load()?,
        }))
    }
}

/// Runs blocking database work off the async runtime.
pub async fn blocking<F, T, E>(state: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<AppError>,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db).map_err(Into::into))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            AppError::Join(e.to_string())
        })?
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(messages::home))
        .route("/signup", get(auth::signup_form).post(auth::register))
        .route("/login", get(auth::login_form).post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/users", get(users::list_users))
        .route("/users/{user_id}", get(users::show_user))
        .route("/messages/{message_id}", get(messages::show_message));

    let protected_routes = Router::new()
        .route("/users/{user_id}/following", get(users::show_following))
        .route("/users/{user_id}/followers", get(users::show_followers))
        .route("/users/{user_id}/likes", get(users::show_likes))
        .route("/users/follow/{follow_id}", post(users::follow))
        .route("/users/stop-following/{follow_id}", post(users::stop_following))
        .route("/users/add_like/{message_id}", post(likes::add_like))
        .route("/users/profile", get(users::profile_form).post(users::update_profile))
        .route("/users/delete", post(users::delete_user))
        .route("/messages/new", get(messages::new_message_form).post(messages::create_message))
        .route("/messages/{message_id}/delete", post(messages::delete_message))
        .route_layer(middleware::from_fn(require_user));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), load_session))
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound
}
