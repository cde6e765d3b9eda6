//! Per-connection session state, owned by its task rather than threaded
//! through a shared map keyed by connection id.

/// Mutable state owned by one `ConnectionHandler`. The only state RESP
/// commands mutate outside the storage engine itself is the selected
/// logical `dbNum`.
pub struct Session {
    pub current_db: i64,
}

impl Session {
    pub fn new() -> Self {
        Self { current_db: 0 }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
