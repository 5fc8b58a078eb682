//! Error types for the AniDB provider.

/// Provider result type
pub type Result<T> = std::result::Result<T, AniDbError>;

/// Everything that can go wrong while fetching or reading AniDB data
#[derive(Debug, thiserror::Error)]
pub enum AniDbError {
    /// The caller cancelled the operation; distinct from any fetch failure
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// AniDB answered with an `<error>` document instead of data
    #[error("AniDB error: {0}")]
    Service(String),

    #[error("Failed to decompress response: {0}")]
    Decompress(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Failed to serialize person record: {0}")]
    Serialize(#[from] quick_xml::SeError),

    #[error("Failed to read person record: {0}")]
    Deserialize(#[from] quick_xml::DeError),
}

impl AniDbError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AniDbError::Cancelled)
    }
}
