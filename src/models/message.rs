use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Coordination message between contributors of one group gift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ContributionMessage {
    pub id: Uuid,
    pub gift_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: NaiveDateTime,
}

impl ContributionMessage {
    pub fn new(gift_id: Uuid, sender_id: Uuid, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            gift_id,
            sender_id,
            body,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}
