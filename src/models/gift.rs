use crate::error::RepositoryError;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Gift priority on the owner's list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

/// Raw `gifts` row as the store returns it
#[derive(Debug, Clone, FromRow)]
pub struct GiftRow {
    pub id: Uuid,
    pub wishlist_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub product_url: Option<String>,
    pub target_price: Option<Decimal>,
    pub currency: String,
    pub priority: String,
    pub is_group_gift: bool,
    pub reserved_by: Option<Uuid>,
    pub reserved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A gift on a wishlist.
///
/// Either a single reservation or pooled contributions applies, never both:
/// once `is_group_gift` is set the reservation fields stay empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gift {
    pub id: Uuid,
    pub wishlist_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub product_url: Option<String>,
    pub target_price: Option<Decimal>,
    pub currency: String,
    pub priority: Priority,
    pub is_group_gift: bool,
    pub reserved_by: Option<Uuid>,
    pub reserved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Input for creating a gift
#[derive(Debug, Clone)]
pub struct NewGift {
    pub wishlist_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub product_url: Option<String>,
    pub target_price: Option<Decimal>,
    pub currency: String,
    pub priority: Priority,
}

impl NewGift {
    pub fn new(wishlist_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            wishlist_id,
            title: title.into(),
            description: None,
            product_url: None,
            target_price: None,
            currency: "CZK".to_string(),
            priority: Priority::Medium,
        }
    }

    pub fn priced(mut self, target_price: Decimal, currency: impl Into<String>) -> Self {
        self.target_price = Some(target_price);
        self.currency = currency.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.product_url = Some(url.into());
        self
    }
}

impl Gift {
    pub fn from_new(new: NewGift) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            wishlist_id: new.wishlist_id,
            title: new.title,
            description: new.description,
            product_url: new.product_url,
            target_price: new.target_price,
            currency: new.currency,
            priority: new.priority,
            is_group_gift: false,
            reserved_by: None,
            reserved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_reserved(&self) -> bool {
        !self.is_group_gift && self.reserved_by.is_some()
    }
}

/// Currency codes are three uppercase ASCII letters ("CZK", "EUR")
pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

impl TryFrom<GiftRow> for Gift {
    type Error = RepositoryError;

    fn try_from(row: GiftRow) -> Result<Self, Self::Error> {
        let malformed = |msg: String| RepositoryError::Malformed(format!("gift {}: {}", row.id, msg));

        let priority = Priority::from_str(&row.priority).map_err(malformed)?;

        if !is_valid_currency(&row.currency) {
            return Err(malformed(format!("invalid currency {:?}", row.currency)));
        }

        if let Some(price) = row.target_price {
            if price <= Decimal::ZERO {
                return Err(malformed(format!("non-positive target price {}", price)));
            }
        }

        if row.is_group_gift && row.reserved_by.is_some() {
            return Err(malformed("group gift carries a reservation".to_string()));
        }

        Ok(Self {
            id: row.id,
            wishlist_id: row.wishlist_id,
            title: row.title,
            description: row.description,
            product_url: row.product_url,
            target_price: row.target_price,
            currency: row.currency,
            priority,
            is_group_gift: row.is_group_gift,
            reserved_by: row.reserved_by,
            reserved_at: row.reserved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> GiftRow {
        let now = chrono::Utc::now().naive_utc();
        GiftRow {
            id: Uuid::new_v4(),
            wishlist_id: Uuid::new_v4(),
            title: "Espresso machine".into(),
            description: None,
            product_url: Some("https://shop.example/espresso".into()),
            target_price: Some(Decimal::new(4990, 0)),
            currency: "CZK".into(),
            priority: "high".into(),
            is_group_gift: false,
            reserved_by: None,
            reserved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_valid_row_parses() {
        let gift = Gift::try_from(row()).unwrap();
        assert_eq!(gift.priority, Priority::High);
        assert!(!gift.is_reserved());
    }

    #[test]
    fn test_bad_priority_is_malformed() {
        let mut raw = row();
        raw.priority = "urgent".into();
        assert!(matches!(Gift::try_from(raw), Err(RepositoryError::Malformed(_))));
    }

    #[test]
    fn test_bad_currency_is_malformed() {
        let mut raw = row();
        raw.currency = "czk".into();
        assert!(matches!(Gift::try_from(raw), Err(RepositoryError::Malformed(_))));
    }

    #[test]
    fn test_reserved_group_gift_is_malformed() {
        let mut raw = row();
        raw.is_group_gift = true;
        raw.reserved_by = Some(Uuid::new_v4());
        assert!(matches!(Gift::try_from(raw), Err(RepositoryError::Malformed(_))));
    }
}
