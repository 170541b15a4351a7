//! The `AccessPolicy` aggregate: claim matchers mapping caller identity to
//! allowed tool groups.
//!
//! Matchers within a policy are evaluated with AND; policies are evaluated
//! with OR across the active set, highest priority first.

use context::Claims;
use event_store::Aggregate;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CatalogError;

/// Comparison operator for a claim matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    /// Claim value equals the expected value.
    Equals,
    /// Array claim contains the expected value, or string claim contains the
    /// expected substring.
    Contains,
    /// String claim starts with the expected prefix.
    StartsWith,
    /// String claim matches the expected regular expression.
    Regex,
    /// Claim value is one of the expected list.
    In,
}

/// A rule comparing one claim path against an expected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimMatcher {
    /// Dotted path into the caller's claims (e.g. `sub`, `realm.roles`).
    pub claim_path: String,
    /// Comparison operator.
    pub operator: MatchOperator,
    /// Expected value; an array for the `in` operator.
    pub expected: Value,
}

impl ClaimMatcher {
    /// Builds a matcher.
    pub fn new(claim_path: impl Into<String>, operator: MatchOperator, expected: Value) -> Self {
        Self {
            claim_path: claim_path.into(),
            operator,
            expected,
        }
    }

    /// Whether the caller's claims satisfy this matcher. A missing claim
    /// never matches.
    pub fn matches(&self, claims: &Claims) -> bool {
        let Some(actual) = claims.value_at(&self.claim_path) else {
            return false;
        };

        match self.operator {
            MatchOperator::Equals => actual == self.expected,
            MatchOperator::Contains => match (&actual, &self.expected) {
                (Value::Array(items), expected) => items.contains(expected),
                (Value::String(actual), Value::String(expected)) => actual.contains(expected.as_str()),
                _ => false,
            },
            MatchOperator::StartsWith => match (&actual, &self.expected) {
                (Value::String(actual), Value::String(expected)) => actual.starts_with(expected.as_str()),
                _ => false,
            },
            MatchOperator::Regex => match (&actual, &self.expected) {
                (Value::String(actual), Value::String(pattern)) => match regex::Regex::new(pattern) {
                    Ok(re) => re.is_match(actual),
                    Err(err) => {
                        log::warn!("claim matcher on '{}' has an invalid regex: {err}", self.claim_path);
                        false
                    }
                },
                _ => false,
            },
            MatchOperator::In => match &self.expected {
                Value::Array(allowed) => allowed.contains(&actual),
                _ => false,
            },
        }
    }
}

/// Aggregate state for an access policy.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    /// Aggregate id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Purpose description.
    pub description: Option<String>,
    /// Matchers evaluated with AND.
    pub matchers: Vec<ClaimMatcher>,
    /// Groups this policy grants.
    pub allowed_group_ids: Vec<String>,
    /// Higher priorities evaluate first.
    pub priority: i32,
    /// Only active policies participate in resolution.
    pub is_active: bool,
    /// Soft-deleted policies stay replayable but leave the read model.
    pub deleted: bool,
}

/// Events of the `AccessPolicy` aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessPolicyEvent {
    /// The policy was defined.
    Defined {
        /// Aggregate id.
        id: String,
        /// Display name.
        name: String,
        /// Purpose description.
        description: Option<String>,
        /// Matchers evaluated with AND.
        matchers: Vec<ClaimMatcher>,
        /// Groups this policy grants.
        allowed_group_ids: Vec<String>,
        /// Evaluation priority.
        priority: i32,
        /// When.
        defined_at: Timestamp,
    },
    /// Name or description changed.
    Updated {
        /// New name, when changed.
        name: Option<String>,
        /// New description, when changed.
        description: Option<String>,
        /// When.
        updated_at: Timestamp,
    },
    /// Matchers were replaced.
    MatchersUpdated {
        /// The new matcher list.
        matchers: Vec<ClaimMatcher>,
        /// When.
        updated_at: Timestamp,
    },
    /// Granted groups were replaced.
    GroupsUpdated {
        /// The new group list.
        allowed_group_ids: Vec<String>,
        /// When.
        updated_at: Timestamp,
    },
    /// Priority changed.
    PriorityUpdated {
        /// Previous priority.
        old_priority: i32,
        /// New priority.
        new_priority: i32,
        /// When.
        updated_at: Timestamp,
    },
    /// The policy was activated.
    Activated {
        /// When.
        activated_at: Timestamp,
    },
    /// The policy was deactivated.
    Deactivated {
        /// Optional operator note.
        reason: Option<String>,
        /// When.
        deactivated_at: Timestamp,
    },
    /// The policy was soft-deleted.
    Deleted {
        /// When.
        deleted_at: Timestamp,
    },
}

impl Aggregate for AccessPolicy {
    type Event = AccessPolicyEvent;
    const AGGREGATE_TYPE: &'static str = "access_policy";

    fn apply(&mut self, event: &AccessPolicyEvent) {
        match event {
            AccessPolicyEvent::Defined {
                id,
                name,
                description,
                matchers,
                allowed_group_ids,
                priority,
                ..
            } => {
                self.id = id.clone();
                self.name = name.clone();
                self.description = description.clone();
                self.matchers = matchers.clone();
                self.allowed_group_ids = allowed_group_ids.clone();
                self.priority = *priority;
                self.is_active = true;
            }
            AccessPolicyEvent::Updated { name, description, .. } => {
                if let Some(name) = name {
                    self.name = name.clone();
                }
                if description.is_some() {
                    self.description = description.clone();
                }
            }
            AccessPolicyEvent::MatchersUpdated { matchers, .. } => {
                self.matchers = matchers.clone();
            }
            AccessPolicyEvent::GroupsUpdated { allowed_group_ids, .. } => {
                self.allowed_group_ids = allowed_group_ids.clone();
            }
            AccessPolicyEvent::PriorityUpdated { new_priority, .. } => {
                self.priority = *new_priority;
            }
            AccessPolicyEvent::Activated { .. } => self.is_active = true,
            AccessPolicyEvent::Deactivated { .. } => self.is_active = false,
            AccessPolicyEvent::Deleted { .. } => {
                self.deleted = true;
                self.is_active = false;
            }
        }
    }
}

impl AccessPolicy {
    /// Definition command.
    pub fn define(
        id: &str,
        name: &str,
        description: Option<String>,
        matchers: Vec<ClaimMatcher>,
        allowed_group_ids: Vec<String>,
        priority: i32,
    ) -> Result<Vec<AccessPolicyEvent>, CatalogError> {
        if id.trim().is_empty() {
            return Err(CatalogError::validation("id", "policy id cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(CatalogError::validation("name", "policy name cannot be empty"));
        }
        if matchers.is_empty() {
            return Err(CatalogError::validation("matchers", "at least one claim matcher is required"));
        }
        if allowed_group_ids.is_empty() {
            return Err(CatalogError::validation(
                "allowed_group_ids",
                "at least one allowed group is required",
            ));
        }

        Ok(vec![AccessPolicyEvent::Defined {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            description,
            matchers,
            allowed_group_ids,
            priority,
            defined_at: Timestamp::now(),
        }])
    }

    /// Renames or re-describes the policy. No event when nothing changed.
    pub fn update(&self, name: Option<&str>, description: Option<String>) -> Vec<AccessPolicyEvent> {
        let name = name.map(str::trim).filter(|name| *name != self.name);
        let description = description.filter(|description| Some(description) != self.description.as_ref());

        if name.is_none() && description.is_none() {
            return Vec::new();
        }

        vec![AccessPolicyEvent::Updated {
            name: name.map(str::to_string),
            description,
            updated_at: Timestamp::now(),
        }]
    }

    /// Replaces the matcher list. No event when unchanged.
    pub fn update_matchers(&self, matchers: Vec<ClaimMatcher>) -> Result<Vec<AccessPolicyEvent>, CatalogError> {
        if matchers.is_empty() {
            return Err(CatalogError::validation("matchers", "at least one claim matcher is required"));
        }
        if matchers == self.matchers {
            return Ok(Vec::new());
        }

        Ok(vec![AccessPolicyEvent::MatchersUpdated {
            matchers,
            updated_at: Timestamp::now(),
        }])
    }

    /// Replaces the granted groups. No event when unchanged.
    pub fn update_groups(&self, allowed_group_ids: Vec<String>) -> Result<Vec<AccessPolicyEvent>, CatalogError> {
        if allowed_group_ids.is_empty() {
            return Err(CatalogError::validation(
                "allowed_group_ids",
                "at least one allowed group is required",
            ));
        }
        if allowed_group_ids == self.allowed_group_ids {
            return Ok(Vec::new());
        }

        Ok(vec![AccessPolicyEvent::GroupsUpdated {
            allowed_group_ids,
            updated_at: Timestamp::now(),
        }])
    }

    /// Changes the evaluation priority. No event when unchanged.
    pub fn set_priority(&self, priority: i32) -> Vec<AccessPolicyEvent> {
        if priority == self.priority {
            return Vec::new();
        }
        vec![AccessPolicyEvent::PriorityUpdated {
            old_priority: self.priority,
            new_priority: priority,
            updated_at: Timestamp::now(),
        }]
    }

    /// Activates the policy. No event when already active.
    pub fn activate(&self) -> Vec<AccessPolicyEvent> {
        if self.is_active {
            return Vec::new();
        }
        vec![AccessPolicyEvent::Activated {
            activated_at: Timestamp::now(),
        }]
    }

    /// Deactivates the policy. No event when already inactive.
    pub fn deactivate(&self, reason: Option<String>) -> Vec<AccessPolicyEvent> {
        if !self.is_active {
            return Vec::new();
        }
        vec![AccessPolicyEvent::Deactivated {
            reason,
            deactivated_at: Timestamp::now(),
        }]
    }

    /// Soft-deletes the policy.
    pub fn delete(&self) -> Vec<AccessPolicyEvent> {
        if self.deleted {
            return Vec::new();
        }
        vec![AccessPolicyEvent::Deleted {
            deleted_at: Timestamp::now(),
        }]
    }

    /// Whether the caller's claims satisfy every matcher of this policy.
    pub fn matches_claims(&self, claims: &Claims) -> bool {
        if !self.is_active || self.matchers.is_empty() {
            return false;
        }

        self.matchers.iter().all(|matcher| matcher.matches(claims))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn claims(additional: Value) -> Claims {
        Claims {
            issuer: None,
            audience: None,
            subject: Some("user-1".to_string()),
            additional: serde_json::from_value(additional).unwrap(),
        }
    }

    #[test]
    fn operators_cover_scalar_and_array_claims() {
        let claims = claims(json!({
            "roles": ["admin", "viewer"],
            "email": "alice@example.com",
            "plan": "premium",
        }));

        assert!(ClaimMatcher::new("plan", MatchOperator::Equals, json!("premium")).matches(&claims));
        assert!(!ClaimMatcher::new("plan", MatchOperator::Equals, json!("free")).matches(&claims));

        assert!(ClaimMatcher::new("roles", MatchOperator::Contains, json!("admin")).matches(&claims));
        assert!(!ClaimMatcher::new("roles", MatchOperator::Contains, json!("owner")).matches(&claims));
        assert!(ClaimMatcher::new("email", MatchOperator::Contains, json!("@example.")).matches(&claims));

        assert!(ClaimMatcher::new("email", MatchOperator::StartsWith, json!("alice@")).matches(&claims));

        assert!(ClaimMatcher::new("email", MatchOperator::Regex, json!(r"^[a-z]+@example\.com$")).matches(&claims));

        assert!(ClaimMatcher::new("plan", MatchOperator::In, json!(["premium", "enterprise"])).matches(&claims));
        assert!(!ClaimMatcher::new("plan", MatchOperator::In, json!(["free"])).matches(&claims));
    }

    #[test]
    fn missing_claims_never_match() {
        let claims = claims(json!({}));
        assert!(!ClaimMatcher::new("roles", MatchOperator::Contains, json!("admin")).matches(&claims));
    }

    #[test]
    fn policy_requires_every_matcher() {
        let mut policy = AccessPolicy::default();
        let events = AccessPolicy::define(
            "admins",
            "Admins",
            None,
            vec![
                ClaimMatcher::new("roles", MatchOperator::Contains, json!("admin")),
                ClaimMatcher::new("iss", MatchOperator::Equals, json!("https://idp")),
            ],
            vec!["ops".into()],
            10,
        )
        .unwrap();
        for event in &events {
            policy.apply(event);
        }

        let mut matching = claims(json!({"roles": ["admin"]}));
        matching.issuer = Some("https://idp".into());
        assert!(policy.matches_claims(&matching));

        let partial = claims(json!({"roles": ["admin"]}));
        assert!(!policy.matches_claims(&partial));
    }

    #[test]
    fn inactive_policies_grant_nothing() {
        let mut policy = AccessPolicy::default();
        for event in AccessPolicy::define(
            "p",
            "P",
            None,
            vec![ClaimMatcher::new("sub", MatchOperator::Equals, json!("user-1"))],
            vec!["g".into()],
            0,
        )
        .unwrap()
        {
            policy.apply(&event);
        }

        let claims = claims(json!({}));
        assert!(policy.matches_claims(&claims));

        for event in policy.deactivate(None) {
            policy.apply(&event);
        }
        assert!(!policy.matches_claims(&claims));
        assert!(policy.deactivate(None).is_empty());
    }

    #[test]
    fn definition_requires_matchers_and_groups() {
        assert!(AccessPolicy::define("p", "P", None, vec![], vec!["g".into()], 0).is_err());
        assert!(
            AccessPolicy::define(
                "p",
                "P",
                None,
                vec![ClaimMatcher::new("sub", MatchOperator::Equals, json!("x"))],
                vec![],
                0
            )
            .is_err()
        );
    }
}
