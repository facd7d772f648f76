//! The parsed request/response unit routed between connections and workers.

/// A parsed request, or a sentinel telling a worker to finalize.
///
/// `connection_id < 0` marks the finalize sentinel; such a message carries
/// no real `msgid`/`target` and is never written back to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub connection_id: i64,
    pub msgid: String,
    pub target: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(connection_id: i64, msgid: impl Into<String>, target: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            connection_id,
            msgid: msgid.into(),
            target: target.into(),
            payload,
        }
    }

    /// Build the sentinel message a worker pool sends to tell a worker to
    /// finalize. The connection id of `-1` is never a real connection.
    pub fn finalize() -> Self {
        Self {
            connection_id: -1,
            msgid: String::new(),
            target: String::new(),
            payload: Vec::new(),
        }
    }

    pub fn is_finalize(&self) -> bool {
        self.connection_id < 0
    }

    /// The routing method byte, i.e. the first byte of `target`.
    pub fn method(&self) -> Option<u8> {
        self.target.as_bytes().first().copied()
    }

    /// The `/`-separated components after the method byte.
    pub fn path_components(&self) -> Vec<&str> {
        if self.target.is_empty() {
            return Vec::new();
        }
        self.target[1..].split('/').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_is_a_negative_connection_id() {
        let m = Message::finalize();
        assert!(m.is_finalize());
        assert_eq!(m.connection_id, -1);
    }

    #[test]
    fn method_and_path_components() {
        let m = Message::new(1, "7", "Gdb/main", Vec::new());
        assert_eq!(m.method(), Some(b'G'));
        assert_eq!(m.path_components(), vec!["db", "main"]);
    }

    #[test]
    fn version_target_has_no_path_components() {
        let m = Message::new(0, "abc", "Gversion", Vec::new());
        assert_eq!(m.method(), Some(b'G'));
        assert_eq!(m.path_components(), vec!["version"]);
    }
}
