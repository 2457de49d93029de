use axum::{
    Extension,
    extract::{Path, State},
    response::Response,
};
use tracing::{info, warn};

use crate::error::AppError;
use crate::session::{AuthUser, found};
use crate::{AppState, blocking};

/// POST /users/add_like/{message_id} — toggles the current user's like.
/// Liking your own message is not allowed.
pub async fn add_like(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(message_id): Path<i64>,
) -> Result<Response, AppError> {
    let uid = user.id;
    let added = blocking(&state, move |db| -> Result<_, AppError> {
        let Some(message) = db.get_message(message_id)? else {
            return Err(AppError::NotFound);
        };
        if message.user_id == uid {
            warn!("User {} tried to like own message {}", uid, message_id);
            return Err(AppError::Unauthorized);
        }
        Ok(db.toggle_like(uid, message_id)?)
    })
    .await?;

    if added {
        info!("User {} liked message {}", uid, message_id);
    } else {
        info!("User {} unliked message {}", uid, message_id);
    }

    Ok(found("/"))
}
