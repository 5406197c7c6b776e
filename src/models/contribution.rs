//! Contribution rows and the derived funding summary

use crate::error::RepositoryError;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Raw `contributions` row as the store returns it
#[derive(Debug, Clone, FromRow)]
pub struct ContributionRow {
    pub id: Uuid,
    pub gift_id: Uuid,
    pub contributor_id: Uuid,
    pub amount: Decimal,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// One user's pledge toward a group gift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: Uuid,
    pub gift_id: Uuid,
    pub contributor_id: Uuid,
    pub amount: Decimal,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<ContributionRow> for Contribution {
    type Error = RepositoryError;

    fn try_from(row: ContributionRow) -> Result<Self, Self::Error> {
        if row.amount <= Decimal::ZERO {
            return Err(RepositoryError::Malformed(format!(
                "contribution {}: non-positive amount {}",
                row.id, row.amount
            )));
        }

        Ok(Self {
            id: row.id,
            gift_id: row.gift_id,
            contributor_id: row.contributor_id,
            amount: row.amount,
            message: row.message,
            is_anonymous: row.is_anonymous,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Validated input for a pledge
#[derive(Debug, Clone)]
pub struct ContributionDraft {
    pub gift_id: Uuid,
    pub contributor_id: Uuid,
    pub amount: Decimal,
    pub message: Option<String>,
    pub is_anonymous: bool,
}

/// Partial edit of an existing pledge; `None` leaves the field alone
#[derive(Debug, Clone, Default)]
pub struct ContributionPatch {
    pub amount: Option<Decimal>,
    pub message: Option<Option<String>>,
    pub is_anonymous: Option<bool>,
}

impl ContributionPatch {
    pub fn amount(amount: Decimal) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }

    pub fn apply(&self, contribution: &mut Contribution) {
        if let Some(amount) = self.amount {
            contribution.amount = amount;
        }
        if let Some(message) = &self.message {
            contribution.message = message.clone();
        }
        if let Some(is_anonymous) = self.is_anonymous {
            contribution.is_anonymous = is_anonymous;
        }
    }
}

/// Whether an upsert created a new row or rewrote the caller's existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Funding progress, recomputed from contribution rows on every read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupGiftSummary {
    pub gift_id: Uuid,
    pub currency: String,
    /// Absent when the gift has no target price
    pub target_amount: Option<Decimal>,
    pub total_contributed: Decimal,
    pub remaining_amount: Option<Decimal>,
    pub contributor_count: usize,
    pub is_fully_funded: bool,
}

impl GroupGiftSummary {
    pub fn compute(
        gift_id: Uuid,
        target_amount: Option<Decimal>,
        currency: &str,
        contributions: &[Contribution],
    ) -> Self {
        let total_contributed: Decimal = contributions.iter().map(|c| c.amount).sum();
        let remaining_amount = target_amount.map(|target| remaining(target, total_contributed));

        Self {
            gift_id,
            currency: currency.to_string(),
            target_amount,
            total_contributed,
            remaining_amount,
            contributor_count: contributions.len(),
            is_fully_funded: remaining_amount == Some(Decimal::ZERO),
        }
    }

    /// Share of the target already pledged, in percent (0..=100)
    pub fn progress_percent(&self) -> Option<Decimal> {
        self.target_amount.map(|target| {
            let percent = self.total_contributed * Decimal::ONE_HUNDRED / target;
            percent.min(Decimal::ONE_HUNDRED).round_dp(1)
        })
    }
}

/// max(0, target - total)
pub fn remaining(target: Decimal, total: Decimal) -> Decimal {
    (target - total).max(Decimal::ZERO)
}

/// Sum of every pledge except the given contributor's own
pub fn total_excluding(contributions: &[Contribution], contributor_id: Uuid) -> Decimal {
    contributions
        .iter()
        .filter(|c| c.contributor_id != contributor_id)
        .map(|c| c.amount)
        .sum()
}
