use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("serialization error: {0}")]
    Serde(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Encodes a document to its `Store`-crossing `serde_json::Value`
/// representation, wrapping a serialization failure as a [`CoreError`]
/// rather than panicking — every document type here is plain data, so
/// this should never actually fail outside of a programming error.
pub fn encode<T: Serialize>(value: &T) -> CoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|err| CoreError::Serde(err.to_string()))
}
