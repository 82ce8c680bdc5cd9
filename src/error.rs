use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid period type: {0}")]
    InvalidPeriodType(String),

    #[error("Invalid metric type: {0}")]
    InvalidMetricType(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid metric value: {0}")]
    InvalidValue(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Ambiguous fiscal configuration: {0}")]
    FiscalConfigurationAmbiguous(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
