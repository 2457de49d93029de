use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, warn};

use warbler_db::models::UserRow;
use warbler_types::api::SessionClaims;
use warbler_types::flash::Flash;

use crate::error::AppError;
use crate::{AppState, blocking};

pub const SESSION_COOKIE: &str = "warbler_session";
pub const FLASH_COOKIE: &str = "warbler_flash";

const SESSION_DAYS: i64 = 30;

/// Per-request view of the session, inserted by [`load_session`].
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user: Option<UserRow>,
    pub flash: Option<Flash>,
}

/// The logged-in user on routes behind [`require_user`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserRow);

pub fn issue_token(secret: &str, user_id: i64) -> Result<String, AppError> {
    let claims = SessionClaims {
        curr_user: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(SESSION_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn decode_token(secret: &str, token: &str) -> Result<SessionClaims, AppError> {
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn flash_cookie(flash: Flash) -> Cookie<'static> {
    Cookie::build((FLASH_COOKIE, flash.code()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, "")).path("/").build();
    cookie.make_removal();
    cookie
}

/// 302 Found, the status browsers follow with a GET after a form POST.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Resolve the session cookie into a user and pick up any pending flash.
/// Bad or stale tokens are treated as anonymous. A flash is cleared once a
/// page has rendered successfully.
pub async fn load_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let flash = jar.get(FLASH_COOKIE).and_then(|c| Flash::from_code(c.value()));

    let user_id = jar.get(SESSION_COOKIE).and_then(|c| {
        decode_token(&state.secret_key, c.value())
            .map_err(|e| debug!("Ignoring invalid session token: {}", e))
            .ok()
            .map(|claims| claims.curr_user)
    });

    let user = match user_id {
        Some(id) => match blocking(&state, move |db| db.get_user(id)).await {
            Ok(user) => user,
            Err(e) => return e.into_response(),
        },
        None => None,
    };

    req.extensions_mut().insert(Session { user, flash });

    let mut response = next.run(req).await;
    if flash.is_some() && response.status().is_success() {
        if let Ok(value) = HeaderValue::from_str(&removal_cookie(FLASH_COOKIE).to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// Gate for routes that mutate on behalf of the current user.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<Session>()
        .and_then(|s| s.user.clone())
        .ok_or_else(|| {
            warn!("Rejected anonymous {} {}", req.method(), req.uri().path());
            AppError::Unauthorized
        })?;

    req.extensions_mut().insert(AuthUser(user));
    Ok(next.run(req).await)
}
