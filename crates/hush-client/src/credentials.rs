use std::fmt;
use std::sync::Mutex;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Username and room password for one session. Wiped on drop.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// An empty field counts as missing.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Process-scoped credential storage, the terminal analogue of a browser
/// tab's session storage. Filled at startup, cleared on logout.
#[derive(Default)]
pub struct CredentialStore {
    inner: Mutex<Option<Credentials>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from `HUSH_USERNAME` / `HUSH_PASSWORD`. Missing variables leave
    /// the store empty rather than failing; the connection gates on it.
    pub fn from_env() -> Self {
        let store = Self::new();
        if let (Ok(username), Ok(password)) =
            (std::env::var("HUSH_USERNAME"), std::env::var("HUSH_PASSWORD"))
        {
            store.store(Credentials::new(username, password));
        }
        store
    }

    pub fn store(&self, credentials: Credentials) {
        *self.lock() = Some(credentials);
    }

    pub fn load(&self) -> Option<Credentials> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        // Dropping the old value zeroizes it
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Credentials>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
