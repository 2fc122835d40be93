/// Signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

/// Current authentication state. `None` means nobody is signed in.
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<Identity>;
}

/// Identity fixed at start-up, e.g. from the environment.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    identity: Option<Identity>,
}

impl StaticAuth {
    pub fn new(uid: Option<String>, email: Option<String>) -> Self {
        Self {
            identity: uid.map(|uid| Identity { uid, email }),
        }
    }
}

impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<Identity> {
        self.identity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_auth() {
        let auth = StaticAuth::new(Some("drv-1".into()), Some("driver@college.edu".into()));
        let user = auth.current_user().unwrap();
        assert_eq!(user.uid, "drv-1");
        assert_eq!(user.email.as_deref(), Some("driver@college.edu"));

        assert!(StaticAuth::new(None, Some("x@y".into())).current_user().is_none());
        assert!(StaticAuth::default().current_user().is_none());
    }
}
