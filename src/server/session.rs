/// Per-connection bind state. Only a successful bind establishes an
/// identity; a failed one reverts the session to anonymous.
#[derive(Debug, Default)]
pub struct Session {
    bound_dn: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, dn: String) {
        self.bound_dn = if dn.is_empty() { None } else { Some(dn) };
    }

    pub fn reset(&mut self) {
        self.bound_dn = None;
    }

    pub fn bound_dn(&self) -> Option<&str> {
        self.bound_dn.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.bound_dn.is_none()
    }
}
