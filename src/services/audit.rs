use crate::error::{AppError, AppResult};
use crate::models::{Contribution, Gift, UpsertOutcome};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Audit log entry, one JSON object per line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: i64,
    pub event_type: String, // "contribution_recorded", "contribution_withdrawn", "gift_converted"
    pub gift_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub details: serde_json::Value,
}

/// Append-only record of funding and conversion actions
pub struct AuditTrailService {
    log_file: PathBuf,
    file_handle: Arc<Mutex<std::fs::File>>,
}

impl AuditTrailService {
    pub fn new(log_directory: PathBuf) -> AppResult<Self> {
        std::fs::create_dir_all(&log_directory)
            .map_err(|e| AppError::Message(format!("Failed to create log directory: {}", e)))?;

        let date = chrono::Utc::now().format("%Y-%m-%d");
        let log_file = log_directory.join(format!("audit_{}.log", date));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|e| AppError::Message(format!("Failed to open audit log file: {}", e)))?;

        info!("Audit trail initialized: {:?}", log_file);

        Ok(Self {
            log_file,
            file_handle: Arc::new(Mutex::new(file)),
        })
    }

    pub fn log_file(&self) -> &PathBuf {
        &self.log_file
    }

    pub async fn log(&self, entry: AuditLogEntry) -> AppResult<()> {
        let json = serde_json::to_string(&entry)?;

        let mut file = self.file_handle.lock().await;
        writeln!(file, "{}", json)
            .map_err(|e| AppError::Message(format!("Failed to write audit log: {}", e)))?;

        file.flush()
            .map_err(|e| AppError::Message(format!("Failed to flush audit log: {}", e)))?;

        Ok(())
    }

    pub async fn log_contribution(
        &self,
        contribution: &Contribution,
        outcome: UpsertOutcome,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "contribution_recorded".to_string(),
            gift_id: Some(contribution.gift_id),
            user_id: Some(contribution.contributor_id),
            details: serde_json::json!({
                "contribution_id": contribution.id.to_string(),
                "amount": contribution.amount.to_string(),
                "is_anonymous": contribution.is_anonymous,
                "replaced_previous": outcome == UpsertOutcome::Updated,
            }),
        };

        self.log(entry).await
    }

    pub async fn log_withdrawal(&self, contribution: &Contribution) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "contribution_withdrawn".to_string(),
            gift_id: Some(contribution.gift_id),
            user_id: Some(contribution.contributor_id),
            details: serde_json::json!({
                "contribution_id": contribution.id.to_string(),
                "amount": contribution.amount.to_string(),
            }),
        };

        self.log(entry).await
    }

    /// `trigger` says who converted: "suggestions" or "owner"
    pub async fn log_conversion(
        &self,
        gift: &Gift,
        actor: Option<Uuid>,
        trigger: &str,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "gift_converted".to_string(),
            gift_id: Some(gift.id),
            user_id: actor,
            details: serde_json::json!({
                "wishlist_id": gift.wishlist_id.to_string(),
                "target_price": gift.target_price.map(|p| p.to_string()),
                "currency": gift.currency,
                "trigger": trigger,
            }),
        };

        self.log(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewGift;

    #[tokio::test]
    async fn test_conversion_is_written_as_json_line() {
        let dir = std::env::temp_dir().join(format!("giftpool-audit-{}", Uuid::new_v4()));
        let audit = AuditTrailService::new(dir.clone()).unwrap();
        let gift = Gift::from_new(NewGift::new(Uuid::new_v4(), "Tent"));

        audit.log_conversion(&gift, None, "suggestions").await.unwrap();

        let contents = std::fs::read_to_string(audit.log_file()).unwrap();
        let entry: AuditLogEntry = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(entry.event_type, "gift_converted");
        assert_eq!(entry.gift_id, Some(gift.id));

        std::fs::remove_dir_all(dir).ok();
    }
}
