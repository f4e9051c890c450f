use actix_web::{http::StatusCode, ResponseError};
use anyhow::Error as ANYHOW_ERROR;
use bigdecimal::ParseBigDecimalError as BIG_DECIMAL_ERROR;
use reqwest::Error as REQWEST_ERROR;
use serde_json::Error as JSON_ERROR;
use std::{
    env::VarError, io::Error as IO_ERROR, num::ParseIntError,
    str::ParseBoolError as PARSE_BOOL_ERROR,
};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::subscriber::SetGlobalDefaultError as TRACING_GLOBAL_DEFAULT_ERROR;
use url::ParseError as URL_ERROR;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] IO_ERROR),

    #[error("{0}")]
    URL(#[from] URL_ERROR),

    #[error("{0}")]
    INT(#[from] ParseIntError),

    #[error("{0}")]
    VAR(#[from] VarError),

    #[error("{0}")]
    TokioJoinError(#[from] JoinError),

    #[error("{0}")]
    BigDecimalError(#[from] BIG_DECIMAL_ERROR),

    #[error("{0}")]
    JsonError(#[from] JSON_ERROR),

    #[error("{0}")]
    ParseBoolError(#[from] PARSE_BOOL_ERROR),

    #[error("{0}")]
    ReqwestError(#[from] REQWEST_ERROR),

    #[error("Tracing error: {0}")]
    SetGlobalDefaultError(#[from] TRACING_GLOBAL_DEFAULT_ERROR),

    #[error("{0}")]
    AnyHowError(#[from] ANYHOW_ERROR),

    #[error("Field not exists: {0}")]
    FieldNotExist(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Server end with error: {0}")]
    ServerError(String),

    #[error("Protocol not found: {0}")]
    ProtocolError(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Upstream has not indexed the requested block yet: {0}")]
    IndexingLag(String),

    #[error("Upstream resolved a missing entity: {0}")]
    MissingEntity(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error(
        "Blocks not properly sorted: prev_highest: {prev_highest}, lowest: {lowest}"
    )]
    OrderingViolation { prev_highest: i64, lowest: i64 },

    #[error("Price not available at block {block}")]
    PriceUnavailable { block: i64 },

    #[error("{0} already running")]
    AlreadyRunning(String),

    #[error("Page of {records} records exceeds the limit of {limit}, lower the batch size")]
    PageTooLarge { records: usize, limit: usize },
}

impl Error {
    /// Errors that must stop a long-running process until someone looks at
    /// the upstream data.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::OrderingViolation { .. }
                | Error::PriceUnavailable { .. }
                | Error::PageTooLarge { .. }
        )
    }

    pub fn is_indexing_lag(&self) -> bool {
        matches!(self, Error::IndexingLag(_))
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::ProtocolError(_)
            | Error::NotSupported(_)
            | Error::FieldNotExist(_) => StatusCode::BAD_REQUEST,
            Error::UpstreamError(_) | Error::IndexingLag(_) => {
                StatusCode::BAD_GATEWAY
            },
            Error::AlreadyRunning(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
