use std::collections::HashMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request-scoped authentication state, inserted by the auth layer and read
/// by every handler that needs the caller's identity.
#[derive(Default, Clone, Debug)]
pub struct Authentication {
    /// The verified caller token, when the request carried one.
    pub caller: Option<CallerToken>,
}

impl Authentication {
    /// The verified claims of the caller, if authenticated.
    pub fn claims(&self) -> Option<&Claims> {
        self.caller.as_ref().map(|token| token.claims())
    }

    /// The caller's subject, if authenticated and present in the token.
    pub fn subject(&self) -> Option<&str> {
        self.claims().and_then(|claims| claims.subject.as_deref())
    }
}

/// A validated caller token: the raw credential for delegation downstream
/// plus the decoded claims for access evaluation.
#[derive(Clone, Debug)]
pub struct CallerToken {
    /// The raw bearer credential. Held as a secret; only the token exchange
    /// path ever exposes it.
    pub raw: SecretString,
    /// The validated claim set, including standard timestamp claims.
    pub decoded: jwt_compact::Claims<Claims>,
}

impl CallerToken {
    /// Wraps a validated credential. The auth layer is the only production
    /// caller; tests construct these directly.
    pub fn new(raw: SecretString, decoded: jwt_compact::Claims<Claims>) -> Self {
        Self { raw, decoded }
    }

    /// The custom claims used for access evaluation.
    pub fn claims(&self) -> &Claims {
        &self.decoded.custom
    }

    /// The caller's subject.
    pub fn subject(&self) -> Option<&str> {
        self.claims().subject.as_deref()
    }
}

/// Custom JWT claims that include standard identity claims plus arbitrary
/// additional fields addressed by claim paths in access policies.
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer claim - identifies the principal that issued the JWT
    #[serde(default, rename = "iss")]
    pub issuer: Option<String>,

    /// Audience claim - identifies the recipients that the JWT is intended for
    #[serde_as(deserialize_as = "Option<serde_with::OneOrMany<_>>")]
    #[serde(default, rename = "aud")]
    pub audience: Option<Vec<String>>,

    /// Subject claim - identifies the principal that is the subject of the JWT
    #[serde(default, rename = "sub")]
    pub subject: Option<String>,

    /// Additional claims for flexible access to custom fields
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

impl Claims {
    /// Extract the raw JSON value at a claim path, supporting nested claims.
    ///
    /// Paths can be simple (e.g., "sub") or nested (e.g., "user.plan").
    /// Array-valued claims such as `roles` are returned whole so callers can
    /// apply membership operators.
    pub fn value_at(&self, path: &str) -> Option<Value> {
        match path {
            "iss" => return self.issuer.clone().map(Value::String),
            "sub" => return self.subject.clone().map(Value::String),
            "aud" => {
                return self
                    .audience
                    .as_ref()
                    .map(|audiences| Value::Array(audiences.iter().cloned().map(Value::String).collect()));
            }
            _ => {}
        }

        let mut parts = path.split('.');
        let first = parts.next()?;
        let current = parts.fold(self.additional.get(first).unwrap_or(&Value::Null), |current, part| {
            current.get(part).unwrap_or(&Value::Null)
        });

        match current {
            Value::Null => None,
            found => Some(found.clone()),
        }
    }

    /// Extract a claim value by path as a string.
    ///
    /// Non-scalar values are not stringified; use [`Claims::value_at`] for
    /// membership checks on arrays.
    pub fn get_claim(&self, path: &str) -> Option<String> {
        match self.value_at(path)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn claims(additional: Value) -> Claims {
        Claims {
            issuer: Some("https://idp.example.com".to_string()),
            audience: Some(vec!["switchboard".to_string()]),
            subject: Some("user-1".to_string()),
            additional: serde_json::from_value(additional).unwrap(),
        }
    }

    #[test]
    fn standard_claims_resolve_by_path() {
        let claims = claims(json!({}));

        assert_eq!(claims.get_claim("sub").as_deref(), Some("user-1"));
        assert_eq!(claims.get_claim("iss").as_deref(), Some("https://idp.example.com"));
        assert_eq!(claims.value_at("aud"), Some(json!(["switchboard"])));
    }

    #[test]
    fn nested_paths_walk_additional_claims() {
        let claims = claims(json!({
            "user": { "plan": "premium", "seats": 5 },
            "roles": ["admin", "viewer"],
        }));

        assert_eq!(claims.get_claim("user.plan").as_deref(), Some("premium"));
        assert_eq!(claims.get_claim("user.seats").as_deref(), Some("5"));
        assert_eq!(claims.value_at("roles"), Some(json!(["admin", "viewer"])));
        assert_eq!(claims.value_at("user.missing"), None);
    }

    #[test]
    fn arrays_do_not_stringify() {
        let claims = claims(json!({ "roles": ["admin"] }));

        assert_eq!(claims.get_claim("roles"), None);
    }

    #[test]
    fn single_audience_deserializes_from_scalar() {
        let claims: Claims = serde_json::from_value(json!({
            "sub": "user-2",
            "aud": "switchboard",
        }))
        .unwrap();

        assert_eq!(claims.audience, Some(vec!["switchboard".to_string()]));
    }
}
