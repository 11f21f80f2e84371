//! Company model for invoicing-service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Issuing company. An invoice always belongs to exactly one company.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Company {
    pub company_id: Uuid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a company.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCompany {
    #[validate(length(min = 1, max = 255, message = "Company name is required"))]
    pub name: String,
}
