use std::fmt;

use uuid::Uuid;

use crate::error::GradingError;
use crate::models::{GradingComponent, RecordStatus};

pub const WEIGHT_LIMIT: f64 = 100.0;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightStatus {
    Under,
    Complete,
    Over,
}

impl WeightStatus {
    pub fn from_total(total: f64) -> Self {
        if (total - WEIGHT_LIMIT).abs() < EPSILON {
            WeightStatus::Complete
        } else if total < WEIGHT_LIMIT {
            WeightStatus::Under
        } else {
            WeightStatus::Over
        }
    }
}

impl fmt::Display for WeightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightStatus::Under => f.write_str("under 100%"),
            WeightStatus::Complete => f.write_str("exactly 100%"),
            WeightStatus::Over => f.write_str("over 100%"),
        }
    }
}

/// A proposed add or edit of one grading component.
#[derive(Debug, Clone)]
pub struct ComponentChange {
    pub id: Option<Uuid>,
    pub name: String,
    pub weight: f64,
    pub status: RecordStatus,
}

pub fn active_total(components: &[GradingComponent]) -> f64 {
    components
        .iter()
        .filter(|component| component.status.is_active())
        .map(|component| component.weight)
        .sum()
}

/// Checks that applying `change` keeps the active total at or under 100.
/// Returns the resulting active total.
pub fn check_change(
    components: &[GradingComponent],
    change: &ComponentChange,
) -> Result<f64, GradingError> {
    if change.name.trim().is_empty() {
        return Err(GradingError::EmptyName);
    }
    if !change.weight.is_finite() || change.weight < 0.0 {
        return Err(GradingError::InvalidWeight {
            weight: change.weight,
        });
    }

    let current_total = active_total(components);
    let others: f64 = components
        .iter()
        .filter(|component| Some(component.id) != change.id)
        .filter(|component| component.status.is_active())
        .map(|component| component.weight)
        .sum();
    let proposed_total = if change.status.is_active() {
        others + change.weight
    } else {
        others
    };

    if proposed_total > WEIGHT_LIMIT + EPSILON {
        return Err(GradingError::WeightLimitExceeded {
            current_total,
            proposed_total,
        });
    }
    Ok(proposed_total)
}
