use thiserror::Error;

use crate::asset::AssetKey;
use crate::units::ByteSize;

/// Errors surfaced by the asset pipeline.
///
/// Every variant carries owned strings so a single failure can be handed to
/// all waiters attached to the same in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Asset not found: {0}")]
    NotFound(AssetKey),

    #[error("Asset too large: {size} exceeds the {limit} limit")]
    TooLarge { size: ByteSize, limit: ByteSize },

    #[error("Cancelled")]
    Cancelled,
}

impl AssetError {
    pub fn is_network(&self) -> bool {
        matches!(self, AssetError::Network(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, AssetError::Decode(_))
    }
}

impl From<reqwest::Error> for AssetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AssetError::Decode(err.to_string())
        } else {
            AssetError::Network(err.to_string())
        }
    }
}

impl From<image::ImageError> for AssetError {
    fn from(err: image::ImageError) -> Self {
        AssetError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AssetError>;
