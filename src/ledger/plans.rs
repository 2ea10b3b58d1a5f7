use serde::{Deserialize, Serialize};
use tracing::warn;

/// key: voice-plan-policy -> allotment per plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanPolicy {
    pub monthly_seconds: i64,
    pub daily_seconds_default: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Plus,
    Pro,
}

impl Plan {
    pub fn policy(&self) -> PlanPolicy {
        match self {
            Plan::Free => PlanPolicy {
                monthly_seconds: 180,
                daily_seconds_default: 60,
            },
            Plan::Plus => PlanPolicy {
                monthly_seconds: 3_600,
                daily_seconds_default: 600,
            },
            Plan::Pro => PlanPolicy {
                monthly_seconds: 18_000,
                daily_seconds_default: 1_800,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Plus => "plus",
            Plan::Pro => "pro",
        }
    }

    /// Strict parse of a stored plan code.
    pub fn from_code(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Plan::Free),
            "plus" | "standard" | "plus_monthly" => Some(Plan::Plus),
            "pro" | "premium" | "pro_monthly" => Some(Plan::Pro),
            _ => None,
        }
    }

    /// Plan identifiers arrive from the billing provider and are not trusted; anything
    /// unrecognised falls back to the free tier.
    pub fn resolve(value: &str) -> Self {
        match Self::from_code(value) {
            Some(plan) => plan,
            None => {
                warn!(plan = %value, "unrecognised plan identifier; using free tier policy");
                Plan::Free
            }
        }
    }

    pub fn is_plus(&self) -> bool {
        matches!(self, Plan::Plus)
    }

    pub fn is_pro(&self) -> bool {
        matches!(self, Plan::Pro)
    }
}
