use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use warbler_db::DbError;
use warbler_types::flash::Flash;

use crate::session::{flash_cookie, found};

const NOT_FOUND_PAGE: &str = include_str!("../templates/404.html");

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    /// No logged-in user, or the user may not touch this resource.
    #[error("access unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("session token error: {0}")]
    Session(#[from] jsonwebtoken::errors::Error),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("blocking task failed: {0}")]
    Join(String),
}

impl AppError {
    /// True for UNIQUE / NOT NULL / FOREIGN KEY violations raised by the database.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Db(e) if e.is_integrity())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response(),
            Self::Unauthorized => {
                let mut response = found("/");
                if let Ok(value) = HeaderValue::from_str(&flash_cookie(Flash::Unauthorized).to_string()) {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
                response
            }
            other => {
                error!("Request failed: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
