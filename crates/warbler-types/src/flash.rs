use serde::Serialize;

/// One-shot notices carried across a redirect. Only the short code travels
/// in the cookie; the text is looked up on render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flash {
    Unauthorized,
    Welcome,
    LoggedOut,
    CannotFollowSelf,
    ProfileUpdated,
    AccountDeleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlashView {
    pub category: &'static str,
    pub message: &'static str,
}

impl Flash {
    pub fn code(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Welcome => "welcome",
            Self::LoggedOut => "logged-out",
            Self::CannotFollowSelf => "follow-self",
            Self::ProfileUpdated => "profile-updated",
            Self::AccountDeleted => "account-deleted",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "unauthorized" => Some(Self::Unauthorized),
            "welcome" => Some(Self::Welcome),
            "logged-out" => Some(Self::LoggedOut),
            "follow-self" => Some(Self::CannotFollowSelf),
            "profile-updated" => Some(Self::ProfileUpdated),
            "account-deleted" => Some(Self::AccountDeleted),
            _ => None,
        }
    }

    pub fn view(self) -> FlashView {
        let (category, message) = match self {
            Self::Unauthorized => ("danger", "Access unauthorized."),
            Self::Welcome => ("success", "Welcome back!"),
            Self::LoggedOut => ("success", "You have been logged out."),
            Self::CannotFollowSelf => ("warning", "You can't follow yourself."),
            Self::ProfileUpdated => ("success", "Profile updated."),
            Self::AccountDeleted => ("success", "Your account has been deleted."),
        };
        FlashView { category, message }
    }
}
