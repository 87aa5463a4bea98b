use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThreatdeskError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Scraping error: {0}")]
    Scraping(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run lock conflict: another analysis run is in progress")]
    LockConflict,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
