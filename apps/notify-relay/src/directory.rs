use std::collections::HashSet;
use std::sync::Arc;

/// Answers whether a username belongs to a known identity. Profiles live
/// outside the relay; this is the only question the relay asks of them.
pub trait UserDirectory: Send + Sync {
    fn exists(&self, username: &str) -> bool;
}

/// Accepts every username.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenDirectory;

impl UserDirectory for OpenDirectory {
    fn exists(&self, _username: &str) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    users: HashSet<String>,
}

impl StaticDirectory {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl UserDirectory for StaticDirectory {
    fn exists(&self, username: &str) -> bool {
        self.users.contains(username)
    }
}

pub fn build_directory(known_users: Option<&[String]>) -> Arc<dyn UserDirectory> {
    match known_users {
        Some(users) => Arc::new(StaticDirectory::new(users.iter().cloned())),
        None => Arc::new(OpenDirectory),
    }
}
