use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Days granted when the plan id is not one we know.
pub const DEFAULT_PLAN_DURATION_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Annual,
    Semester,
    Monthly,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Annual, Plan::Semester, Plan::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Annual => "annual",
            Plan::Semester => "semester",
            Plan::Monthly => "monthly",
        }
    }

    pub fn duration_days(&self) -> i64 {
        match self {
            Plan::Annual => 365,
            Plan::Semester => 180,
            Plan::Monthly => 30,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Plan::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Invalid plan ID: {}", s))
    }
}

/// Membership length for a stored plan id; unknown ids get a year.
pub fn plan_duration_days(plan_id: &str) -> i64 {
    plan_id
        .parse::<Plan>()
        .map(|p| p.duration_days())
        .unwrap_or(DEFAULT_PLAN_DURATION_DAYS)
}

/// Membership fields written onto a user document after a confirmed payment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipGrant {
    pub is_member: bool,
    pub membership_type: String,
    pub membership_start_date: DateTime<Utc>,
    pub membership_expiry_date: DateTime<Utc>,
    pub payment_id: String,
    pub updated_at: DateTime<Utc>,
}

impl MembershipGrant {
    /// Expiry is always `now + duration(plan_id)`.
    pub fn new(plan_id: &str, payment_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            is_member: true,
            membership_type: plan_id.to_string(),
            membership_start_date: now,
            membership_expiry_date: now + Duration::days(plan_duration_days(plan_id)),
            payment_id: payment_id.to_string(),
            updated_at: now,
        }
    }
}

/// Whether the membership upsert touched an existing user or created one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipWrite {
    Updated,
    Created,
}
