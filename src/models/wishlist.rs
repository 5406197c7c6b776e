use crate::error::RepositoryError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Whether the owner may see who reserved their gifts.
///
/// `Personal` preserves the surprise. `Managed` is an explicit opt-in and
/// there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    Personal,
    Managed,
}

impl VisibilityMode {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "personal" => Ok(VisibilityMode::Personal),
            "managed" => Ok(VisibilityMode::Managed),
            _ => Err(format!("Invalid visibility mode: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityMode::Personal => "personal",
            VisibilityMode::Managed => "managed",
        }
    }

    /// The only transition: personal -> managed
    pub fn into_managed(self) -> Self {
        VisibilityMode::Managed
    }

    pub fn is_managed(&self) -> bool {
        *self == VisibilityMode::Managed
    }
}

/// Raw `wishlists` row as the store returns it
#[derive(Debug, Clone, FromRow)]
pub struct WishlistRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub is_public: bool,
    pub visibility_mode: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wishlist {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub is_public: bool,
    pub mode: VisibilityMode,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Wishlist {
    pub fn new(owner_id: Uuid, title: String, is_public: bool) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            title,
            is_public,
            mode: VisibilityMode::Personal,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}

impl TryFrom<WishlistRow> for Wishlist {
    type Error = RepositoryError;

    fn try_from(row: WishlistRow) -> Result<Self, Self::Error> {
        let mode = VisibilityMode::from_str(&row.visibility_mode)
            .map_err(|e| RepositoryError::Malformed(format!("wishlist {}: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            is_public: row.is_public,
            mode,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
