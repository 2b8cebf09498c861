mod load;
mod migrations;
mod write;

pub use load::load;
pub use migrations::migrate;
pub use write::write;

/// Leading bytes of a relational catalog file, used for content sniffing.
pub const FILE_MAGIC: &[u8] = b"SQLite format 3\0";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("database error")]
    Sqlite(#[from] rusqlite::Error),
    #[error("bundle {bundle:?}: failed to decode {column}")]
    Decode {
        bundle: String,
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("bundle {bundle:?}: {field} diverges between channels and cannot be represented")]
    Unrepresentable { bundle: String, field: &'static str },
    #[error("channel {package:?}/{channel:?}: {source}")]
    Head {
        package: String,
        channel: String,
        #[source]
        source: model::ValidateError,
    },
    #[error(transparent)]
    Validate(#[from] model::ValidateErrors),
    #[error(transparent)]
    Property(#[from] properties::Error),
}
