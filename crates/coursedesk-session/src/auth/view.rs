use super::{Credential, Identity};

/// Read-only snapshot of the session, republished after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    pub identity: Option<Identity>,
    pub credential: Option<Credential>,
    pub is_loading: bool,
}

impl SessionView {
    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.identity
            .as_ref()
            .map(|i| i.role.is_elevated())
            .unwrap_or(false)
    }

    pub fn current_user(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}
