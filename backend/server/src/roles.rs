use axum::{http::HeaderMap, response::Redirect};
use bank::models::Role;
use tracing::debug;

use crate::session::{SessionStore, SignedIn};

pub const HOME: &str = "/";

pub fn dashboard_path(role: &Role) -> &'static str {
    match role {
        Role::Estore => "/estore/dashboard",
        Role::Worker => "/skilled-worker/dashboard",
        Role::Admin => "/admin/dashboard",
        Role::Driver => "/driver/dashboard",
        Role::Other(_) => HOME,
    }
}

/// The signed-in user if their role is `role`, otherwise a silent redirect home.
pub fn require_role(
    sessions: &SessionStore,
    headers: &HeaderMap,
    role: Role,
) -> Result<SignedIn, Redirect> {
    match sessions.signed_in(headers) {
        Some(signed_in) if signed_in.role == role => Ok(signed_in),
        Some(signed_in) => {
            debug!("{} ({}) refused from {role} area", signed_in.user.uid, signed_in.role);
            Err(Redirect::to(HOME))
        }
        None => Err(Redirect::to(HOME)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_paths() {
        assert_eq!(dashboard_path(&Role::Estore), "/estore/dashboard");
        assert_eq!(dashboard_path(&Role::Worker), "/skilled-worker/dashboard");
        assert_eq!(dashboard_path(&Role::Admin), "/admin/dashboard");
        assert_eq!(dashboard_path(&Role::Driver), "/driver/dashboard");
        assert_eq!(dashboard_path(&Role::from("customer")), "/");
        assert_eq!(dashboard_path(&Role::default()), "/");
    }

    #[test]
    fn test_anonymous_is_redirected() {
        let sessions = SessionStore::default();
        assert!(require_role(&sessions, &HeaderMap::new(), Role::Admin).is_err());
    }
}
