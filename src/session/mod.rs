//! Session lifecycle: auth state machine, token persistence, and the
//! sequenced current-output slot.
//!
//! The only durable client state is one opaque bearer token held under a
//! fixed storage key. Everything else lives for a single request/render
//! cycle.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Storage key of the persisted session token.
pub const TOKEN_STORAGE_KEY: &str = "chemic_auth_token";

/// Authentication state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Anonymous,
    Authenticated { token: String },
}

impl Auth {
    pub fn token(&self) -> Option<&str> {
        match self {
            Auth::Anonymous => None,
            Auth::Authenticated { token } => Some(token),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Auth::Authenticated { .. })
    }
}

/// Durable storage for the session token.
pub trait TokenStore {
    fn load(&self) -> io::Result<Option<String>>;
    fn save(&self, token: &str) -> io::Result<()>;
    fn clear(&self) -> io::Result<()>;
}

/// Token store backed by a single file named after the storage key.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(TOKEN_STORAGE_KEY),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok(if token.is_empty() {
                    None
                } else {
                    Some(token.to_string())
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, token: &str) -> io::Result<()> {
        fs::write(&self.path, token)
    }

    fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// The auth FSM wired to its durable store: load-on-init, persist-on-set,
/// clear-on-logout.
pub struct Session<S: TokenStore> {
    auth: Auth,
    store: S,
}

impl<S: TokenStore> Session<S> {
    pub fn load(store: S) -> io::Result<Self> {
        let auth = match store.load()? {
            Some(token) => Auth::Authenticated { token },
            None => Auth::Anonymous,
        };
        Ok(Self { auth, store })
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn authenticate(&mut self, token: String) -> io::Result<()> {
        self.store.save(&token)?;
        self.auth = Auth::Authenticated { token };
        Ok(())
    }

    pub fn logout(&mut self) -> io::Result<()> {
        self.store.clear()?;
        self.auth = Auth::Anonymous;
        Ok(())
    }
}

/// The "current output" slot shared by generation submits and history
/// detail fetches.
///
/// Each in-flight request takes a monotonically increasing ticket before
/// it starts; a completion is applied only when its ticket is newer than
/// the last applied one, so a stale response can never overwrite a newer
/// result regardless of arrival order.
pub struct OutputSlot<T> {
    next_ticket: AtomicU64,
    current: Mutex<Option<(u64, T)>>,
}

impl<T> OutputSlot<T> {
    pub fn new() -> Self {
        Self {
            next_ticket: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    /// Takes a ticket for a request about to start.
    pub fn begin(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Applies a completed result. Returns false (and leaves the slot
    /// untouched) when a newer ticket already landed.
    pub fn complete(&self, ticket: u64, value: T) -> bool {
        let mut guard = self.current.lock().expect("output slot poisoned");
        match &*guard {
            Some((applied, _)) if *applied >= ticket => {
                debug!(ticket, applied = *applied, "discarding stale output");
                false
            }
            _ => {
                *guard = Some((ticket, value));
                true
            }
        }
    }

    pub fn current(&self) -> Option<T>
    where
        T: Clone,
    {
        self.current
            .lock()
            .expect("output slot poisoned")
            .as_ref()
            .map(|(_, value)| value.clone())
    }

    pub fn clear(&self) {
        *self.current.lock().expect("output slot poisoned") = None;
    }
}

impl<T> Default for OutputSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct MemoryStore {
        token: RefCell<Option<String>>,
    }

    impl MemoryStore {
        fn new(token: Option<&str>) -> Self {
            Self {
                token: RefCell::new(token.map(str::to_string)),
            }
        }
    }

    impl TokenStore for MemoryStore {
        fn load(&self) -> io::Result<Option<String>> {
            Ok(self.token.borrow().clone())
        }

        fn save(&self, token: &str) -> io::Result<()> {
            *self.token.borrow_mut() = Some(token.to_string());
            Ok(())
        }

        fn clear(&self) -> io::Result<()> {
            *self.token.borrow_mut() = None;
            Ok(())
        }
    }

    #[test]
    fn test_session_loads_persisted_token() {
        let session = Session::load(MemoryStore::new(Some("tok-1"))).expect("load");
        assert!(session.auth().is_authenticated());
        assert_eq!(session.auth().token(), Some("tok-1"));
    }

    #[test]
    fn test_session_round_trip() {
        let mut session = Session::load(MemoryStore::new(None)).expect("load");
        assert_eq!(*session.auth(), Auth::Anonymous);

        session.authenticate("tok-2".to_string()).expect("authenticate");
        assert_eq!(session.auth().token(), Some("tok-2"));

        session.logout().expect("logout");
        assert_eq!(*session.auth(), Auth::Anonymous);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("chemic-test-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let store = FileTokenStore::new(&dir);

        assert_eq!(store.load().expect("load"), None);
        store.save("tok-3").expect("save");
        assert_eq!(store.load().expect("load"), Some("tok-3".to_string()));
        store.clear().expect("clear");
        assert_eq!(store.load().expect("load"), None);
        // clearing twice is fine
        store.clear().expect("clear again");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_output_slot_applies_in_ticket_order() {
        let slot = OutputSlot::new();
        let first = slot.begin();
        let second = slot.begin();

        assert!(slot.complete(first, "old"));
        assert!(slot.complete(second, "new"));
        assert_eq!(slot.current(), Some("new"));
    }

    #[test]
    fn test_output_slot_discards_stale_completion() {
        let slot = OutputSlot::new();
        let first = slot.begin();
        let second = slot.begin();

        // The later request finishes first; the earlier one is stale.
        assert!(slot.complete(second, "new"));
        assert!(!slot.complete(first, "old"));
        assert_eq!(slot.current(), Some("new"));
    }

    #[test]
    fn test_output_slot_clear() {
        let slot = OutputSlot::new();
        let ticket = slot.begin();
        slot.complete(ticket, 1);
        slot.clear();
        assert_eq!(slot.current(), None);
    }
}
