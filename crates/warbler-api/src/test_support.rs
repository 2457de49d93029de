use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use tower::ServiceExt;

use warbler_db::Database;
use warbler_db::models::UserRow;

use crate::session::{SESSION_COOKIE, issue_token};
use crate::{AppState, AppStateInner, auth};

/// In-memory app plus helpers to drive it like a browser would.
pub(crate) struct TestApp {
    pub state: AppState,
    router: Router,
}

pub(crate) struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl TestResponse {
    /// Value of the named cookie in this response's Set-Cookie headers.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{name}=");
        self.set_cookies.iter().find_map(|c| {
            c.strip_prefix(&prefix)
                .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
        })
    }
}

impl TestApp {
    pub fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        let state = AppStateInner::new(db, "test-secret".into()).unwrap();
        let router = crate::router(state.clone());
        Self { state, router }
    }

    /// Signs up a user whose password is "password".
    pub fn signup(&self, username: &str, email: &str) -> UserRow {
        auth::signup(&self.state.db, Some(username), Some(email), "password", None).unwrap()
    }

    /// A Cookie header value that logs the request in as `user_id`.
    pub fn session_for(&self, user_id: i64) -> String {
        let token = issue_token(&self.state.secret_key, user_id).unwrap();
        format!("{SESSION_COOKIE}={token}")
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(c) = cookie {
            builder = builder.header(header::COOKIE, c);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(&self, uri: &str, body: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(c) = cookie {
            builder = builder.header(header::COOKIE, c);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// POST, then follow any redirects with GETs carrying the same cookie.
    pub async fn post_form_follow(
        &self,
        uri: &str,
        body: &str,
        cookie: Option<&str>,
    ) -> TestResponse {
        let mut resp = self.post_form(uri, body, cookie).await;
        while resp.status.is_redirection() {
            let location = resp.location.clone().unwrap();
            resp = self.get(&location, cookie).await;
        }
        resp
    }

    async fn send(&self, req: Request<Body>) -> TestResponse {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let location = resp
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let set_cookies = resp
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            location,
            set_cookies,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }
}
