// src/asset.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

/// A virtual currency definition (GLD, DIA, LPT, ...). Immutable in the
/// transfer engine's write path; `active` is the only flag the core
/// observes, and it rejects inactive assets as a `BadRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetType {
    pub id: Uuid,
    pub name: String,
    pub symbol: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl AssetType {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Result<Self, LedgerError> {
        let symbol = symbol.into();
        if symbol.is_empty() || symbol.len() > 10 {
            return Err(LedgerError::BadRequest(
                "asset symbol must be 1-10 characters".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::now_v7(),
            name: name.into(),
            symbol,
            description: None,
            active: true,
            created_at: Utc::now(),
        })
    }

    /// Rejects the asset as a usable transfer target: missing assets are
    /// caught earlier by the registry lookup, so this only needs to check
    /// the active flag.
    pub fn require_active(&self) -> Result<(), LedgerError> {
        if !self.active {
            return Err(LedgerError::BadRequest(format!(
                "asset '{}' is not active",
                self.symbol
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_symbol() {
        let err = AssetType::new("Eleven Char Coin", "ELEVENCHARS").unwrap_err();
        assert!(matches!(err, LedgerError::BadRequest(_)));
    }

    #[test]
    fn require_active_rejects_inactive() {
        let mut asset = AssetType::new("Gold", "GLD").unwrap();
        asset.active = false;
        assert!(asset.require_active().is_err());
    }
}
