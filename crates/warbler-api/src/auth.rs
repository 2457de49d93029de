use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Form,
    extract::State,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};

use warbler_db::Database;
use warbler_db::models::{NewUser, UserRow};
use warbler_types::api::{LoginForm, SignupForm, non_blank};
use warbler_types::flash::Flash;

use crate::error::AppError;
use crate::session::{
    SESSION_COOKIE, Session, flash_cookie, found, issue_token, removal_cookie, session_cookie,
};
use crate::templates::page_context;
use crate::{AppState, blocking};

const MIN_PASSWORD_LEN: usize = 6;

/// Argon2id with a fresh random salt, encoded as a PHC string.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::PasswordHash(e.to_string()))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AppError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hash the password and insert the user. A missing or duplicate username
/// or email comes back as an integrity error from the database.
pub fn signup(
    db: &Database,
    username: Option<&str>,
    email: Option<&str>,
    password: &str,
    image_url: Option<&str>,
) -> Result<UserRow, AppError> {
    let password_hash = hash_password(password)?;
    let user = db.create_user(&NewUser {
        username,
        email,
        password_hash: &password_hash,
        image_url,
    })?;
    Ok(user)
}

/// The user with this username and password, or `None` on any mismatch.
pub fn authenticate(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<Option<UserRow>, AppError> {
    let Some(user) = db.get_user_by_username(username)? else {
        return Ok(None);
    };

    if verify_password(password, &user.password)? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

// -- Handlers --

pub async fn signup_form(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    render_signup(&state, &session, &SignupForm::default(), None)
}

pub async fn register(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> Result<Response, AppError> {
    if non_blank(&form.username).is_none() || non_blank(&form.email).is_none() {
        return render_signup(&state, &session, &form, Some("Username and email are required."));
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return render_signup(
            &state,
            &session,
            &form,
            Some("Password must be at least 6 characters."),
        );
    }

    let username = non_blank(&form.username).map(str::to_string);
    let email = non_blank(&form.email).map(str::to_string);
    let image_url = non_blank(&form.image_url).map(str::to_string);
    let password = form.password.clone();

    let result = blocking(&state, move |db| {
        signup(
            db,
            username.as_deref(),
            email.as_deref(),
            &password,
            image_url.as_deref(),
        )
    })
    .await;

    let user = match result {
        Ok(user) => user,
        Err(e) if e.is_integrity() => {
            warn!("Signup rejected: {}", e);
            return render_signup(&state, &session, &form, Some("Username already taken"));
        }
        Err(e) => return Err(e),
    };

    info!("New user {} (@{})", user.id, user.username);
    let token = issue_token(&state.secret_key, user.id)?;
    Ok((jar.add(session_cookie(token)), found("/")).into_response())
}

pub async fn login_form(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    render_login(&state, &session, "", None)
}

pub async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let username = form.username.clone();
    let password = form.password;
    let user = blocking(&state, move |db| authenticate(db, &username, &password)).await?;

    let Some(user) = user else {
        warn!("Failed login for '{}'", form.username);
        return render_login(&state, &session, &form.username, Some("Invalid credentials."));
    };

    let token = issue_token(&state.secret_key, user.id)?;
    let jar = jar
        .add(session_cookie(token))
        .add(flash_cookie(Flash::Welcome));
    Ok((jar, found("/")).into_response())
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar
        .remove(removal_cookie(SESSION_COOKIE))
        .add(flash_cookie(Flash::LoggedOut));
    (jar, found("/login"))
}

fn render_signup(
    state: &AppState,
    session: &Session,
    form: &SignupForm,
    error: Option<&str>,
) -> Result<Response, AppError> {
    let mut ctx = page_context(session);
    ctx.insert("username", form.username.as_deref().unwrap_or_default());
    ctx.insert("email", form.email.as_deref().unwrap_or_default());
    ctx.insert("image_url", form.image_url.as_deref().unwrap_or_default());
    ctx.insert("error", &error);
    Ok(state.templates.render("users/signup.html", &ctx)?.into_response())
}

fn render_login(
    state: &AppState,
    session: &Session,
    username: &str,
    error: Option<&str>,
) -> Result<Response, AppError> {
    let mut ctx = page_context(session);
    ctx.insert("username", username);
    ctx.insert("error", &error);
    Ok(state.templates.render("users/login.html", &ctx)?.into_response())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::test_support::TestApp;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn signup_stores_a_hash_not_the_password() {
        let db = db();
        let user = signup(&db, Some("testname"), Some("email@email.com"), "password", None).unwrap();

        let stored = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(stored.username, "testname");
        assert_eq!(stored.email, "email@email.com");
        assert_ne!(stored.password, "password");
        assert!(stored.password.starts_with("$argon2id$"));
    }

    #[test]
    fn signup_without_username_is_an_integrity_error() {
        let db = db();
        let err = signup(&db, None, Some("test@email.com"), "password", None).unwrap_err();
        assert!(err.is_integrity(), "unexpected error: {err}");
    }

    #[test]
    fn signup_with_taken_username_is_an_integrity_error() {
        let db = db();
        signup(&db, Some("testuser"), Some("a@email.com"), "password", None).unwrap();
        let err = signup(&db, Some("testuser"), Some("b@email.com"), "password", None).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn authenticate_returns_the_signed_up_user() {
        let db = db();
        let user = signup(&db, Some("testuser"), Some("test@email.com"), "password", None).unwrap();

        let found = authenticate(&db, "testuser", "password").unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[test]
    fn authenticate_rejects_bad_credentials() {
        let db = db();
        signup(&db, Some("testuser"), Some("test@email.com"), "password", None).unwrap();

        assert!(authenticate(&db, "testuser", "wrong").unwrap().is_none());
        assert!(authenticate(&db, "nobody", "password").unwrap().is_none());
    }

    #[tokio::test]
    async fn signup_route_logs_the_new_user_in() {
        let app = TestApp::new();
        let resp = app
            .post_form(
                "/signup",
                "username=Tink&email=tink%40bell.com&password=password&image_url=",
                None,
            )
            .await;

        assert_eq!(resp.status, StatusCode::FOUND);
        assert_eq!(resp.location.as_deref(), Some("/"));
        let token = resp.cookie(SESSION_COOKIE).unwrap();

        let user = app.state.db.get_user_by_username("Tink").unwrap().unwrap();
        assert_eq!(
            crate::session::decode_token(&app.state.secret_key, &token)
                .unwrap()
                .curr_user,
            user.id
        );
        assert_eq!(user.image_url, warbler_db::migrations::DEFAULT_IMAGE_URL);
    }

    #[tokio::test]
    async fn signup_route_reports_taken_username() {
        let app = TestApp::new();
        app.signup("Tink", "tink@bell.com");

        let resp = app
            .post_form(
                "/signup",
                "username=Tink&email=other%40bell.com&password=password",
                None,
            )
            .await;

        assert_eq!(resp.status, StatusCode::OK);
        assert!(resp.body.contains("Username already taken"));
        assert!(resp.cookie(SESSION_COOKIE).is_none());
    }

    #[tokio::test]
    async fn signup_route_requires_username() {
        let app = TestApp::new();
        let resp = app
            .post_form("/signup", "email=tink%40bell.com&password=password", None)
            .await;

        assert_eq!(resp.status, StatusCode::OK);
        assert!(resp.body.contains("Username and email are required."));
        assert!(app.state.db.list_users(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn login_sets_session_and_welcomes() {
        let app = TestApp::new();
        let user = app.signup("Tink", "tink@bell.com");

        let resp = app
            .post_form("/login", "username=Tink&password=password", None)
            .await;
        assert_eq!(resp.status, StatusCode::FOUND);
        let token = resp.cookie(SESSION_COOKIE).unwrap();
        assert_eq!(
            crate::session::decode_token(&app.state.secret_key, &token)
                .unwrap()
                .curr_user,
            user.id
        );
        assert_eq!(resp.cookie(crate::session::FLASH_COOKIE).as_deref(), Some("welcome"));
    }

    #[tokio::test]
    async fn login_with_wrong_password_rerenders_form() {
        let app = TestApp::new();
        app.signup("Tink", "tink@bell.com");

        let resp = app
            .post_form("/login", "username=Tink&password=nope", None)
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert!(resp.body.contains("Invalid credentials."));
        assert!(resp.cookie(SESSION_COOKIE).is_none());
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let app = TestApp::new();
        let user = app.signup("Tink", "tink@bell.com");
        let cookie = app.session_for(user.id);

        let resp = app.post_form("/logout", "", Some(&cookie)).await;
        assert_eq!(resp.status, StatusCode::FOUND);
        assert_eq!(resp.location.as_deref(), Some("/login"));
        assert_eq!(resp.cookie(SESSION_COOKIE).as_deref(), Some(""));
    }
}
