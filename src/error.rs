/// Field-level rejection of a score or attendance write.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GradingError {
    #[error(
        "active grading weights would total {proposed_total:.2}% (currently {current_total:.2}%), limit is 100%"
    )]
    WeightLimitExceeded {
        current_total: f64,
        proposed_total: f64,
    },

    #[error("grading component name must not be empty")]
    EmptyName,

    #[error("grading weight must be a non-negative number, got {weight}")]
    InvalidWeight { weight: f64 },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictError {
    #[error("no scores available for prediction")]
    InsufficientData,
}

/// A viewer tried to read or write outside their role.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error("{action} is limited to administrators")]
    AdminOnly { action: String },

    #[error("this command is limited to faculty and administrators")]
    StaffOnly,

    #[error("not permitted to modify records for {subject}")]
    EditDenied { subject: String },

    #[error("not permitted to view class records for {subject}")]
    ViewDenied { subject: String },
}
