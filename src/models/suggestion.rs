use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A non-owner's proposal to turn a gift into a group gift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Suggestion {
    pub id: Uuid,
    pub gift_id: Uuid,
    pub user_id: Uuid,
    pub created_at: NaiveDateTime,
}

impl Suggestion {
    pub fn new(gift_id: Uuid, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            gift_id,
            user_id,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}
