use crate::backend::{BackendError, BackendResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    /// JSON array stored as text.
    Json,
}

/// A table reachable through the data-store seam.
#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [(&'static str, ColumnKind)],
    /// Column that must equal the signed-in user id for writes.
    pub owner: &'static str,
    /// Whether a missing `id` is generated on insert.
    pub generated_id: bool,
}

impl TableDef {
    pub fn column(&self, name: &str) -> BackendResult<ColumnKind> {
        self.columns
            .iter()
            .find(|(column, _)| *column == name)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| {
                BackendError::InvalidQuery(format!("Unknown column {}.{}", self.name, name))
            })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| *column == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }
}

use ColumnKind::{Json, Text};

pub const TABLES: &[TableDef] = &[
    TableDef {
        name: "profiles",
        columns: &[
            ("id", Text),
            ("username", Text),
            ("full_name", Text),
            ("avatar_url", Text),
            ("bio", Text),
        ],
        owner: "id",
        generated_id: false,
    },
    TableDef {
        name: "avatar_profiles",
        columns: &[
            ("id", Text),
            ("user_id", Text),
            ("metaverse_service", Text),
            ("service_url", Text),
            ("avatar_name", Text),
            ("avatar_id", Text),
            ("avatar_image_url", Text),
            ("created_at", Text),
        ],
        owner: "user_id",
        generated_id: true,
    },
    TableDef {
        name: "posts",
        columns: &[
            ("id", Text),
            ("user_id", Text),
            ("content", Text),
            ("metaverse_tags", Json),
            ("image_url", Text),
            ("created_at", Text),
        ],
        owner: "user_id",
        generated_id: true,
    },
    TableDef {
        name: "likes",
        columns: &[("user_id", Text), ("post_id", Text), ("created_at", Text)],
        owner: "user_id",
        generated_id: false,
    },
];

pub fn table(name: &str) -> BackendResult<&'static TableDef> {
    TABLES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| BackendError::InvalidQuery(format!("Unknown table {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tables_resolve() {
        assert_eq!(table("posts").unwrap().owner, "user_id");
        assert!(table("users").is_err());
    }

    #[test]
    fn column_kinds() {
        let posts = table("posts").unwrap();
        assert_eq!(posts.column("metaverse_tags").unwrap(), ColumnKind::Json);
        assert_eq!(posts.column("content").unwrap(), ColumnKind::Text);
        assert!(posts.column("password_hash").is_err());
    }
}
