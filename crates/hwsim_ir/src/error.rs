//! Error types for IR construction and structural queries.

/// Errors raised while populating or validating a [`Context`](crate::Context).
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A `Ref` names a type that is not in the type table.
    #[error("unresolved type '{name}' referenced by '{referenced_by}'")]
    UnresolvedType {
        /// The missing type name.
        name: String,
        /// The type (or field path) holding the reference.
        referenced_by: String,
    },

    /// A chain of `Ref`s that loops back on itself.
    #[error("unresolved type reference cycle: {}", chain.join(" -> "))]
    RefCycle {
        /// The names along the cycle, first name repeated at the end.
        chain: Vec<String>,
    },

    /// Two types registered under one name.
    #[error("duplicate type '{0}'")]
    DuplicateType(String),

    /// Two fields with the same name in one type (including inherited fields).
    #[error("duplicate field '{field}' in type '{ty}'")]
    DuplicateField {
        /// The owning type.
        ty: String,
        /// The repeated field name.
        field: String,
    },

    /// A component was expected.
    #[error("type '{0}' is not a component")]
    NotAComponent(String),

    /// A lookup by name failed.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// JSON interchange failed.
    #[error("invalid IR json: {0}")]
    Json(#[from] serde_json::Error),
}
