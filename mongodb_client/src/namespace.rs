use std::fmt;

use serde::{Deserialize, Serialize};

/// A database, optionally narrowed to one collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub db: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coll: Option<String>,
}

impl Namespace {
    pub fn new(db: &str, coll: Option<&str>) -> Self {
        Self {
            db: db.to_string(),
            coll: coll.map(str::to_string),
        }
    }

    /// Splits `db.coll` at the first dot. Collection names may themselves contain dots.
    pub(crate) fn parse(namespace: &str) -> Self {
        match namespace.split_once('.') {
            Some((db, coll)) => Self::new(db, Some(coll)),
            None => Self::new(namespace, None),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.coll {
            Some(coll) => write!(f, "{}.{}", self.db, coll),
            None => write!(f, "{}", self.db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_at_the_first_dot() {
        let namespace = Namespace::parse("admin.$cmd.aggregate");

        assert_eq!(namespace.db, "admin");
        assert_eq!(namespace.coll.as_deref(), Some("$cmd.aggregate"));
        assert_eq!(namespace.to_string(), "admin.$cmd.aggregate");
    }

    #[test]
    fn database_only_namespaces_render_without_a_dot() {
        let namespace = Namespace::parse("inventory");

        assert_eq!(namespace, Namespace::new("inventory", None));
        assert_eq!(namespace.to_string(), "inventory");
    }
}
