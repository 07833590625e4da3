//! Authorization policy descriptors and their evaluation.
//!
//! Routes carry [`AuthorizePolicy`] values; a [`PolicyEvaluator`] decides for
//! the current [`Principal`]. Authentication itself is the host's job: it
//! attaches a `Principal` to the request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Requirement that the user is authenticated and, optionally, satisfies a
/// named policy, holds one of `roles`, and was authenticated by one of
/// `authentication_schemes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentication_schemes: Vec<String>,
}

impl AuthorizePolicy {
    /// Any authenticated user.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn named(policy: impl Into<String>) -> Self {
        Self {
            policy: Some(policy.into()),
            ..Self::default()
        }
    }

    /// Parses a comma separated role list such as `"admin, editor"`.
    pub fn roles(roles: &str) -> Self {
        Self {
            roles: split_list(roles),
            ..Self::default()
        }
    }

    pub fn with_schemes(mut self, schemes: &str) -> Self {
        self.authentication_schemes = split_list(schemes);
        self
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The authenticated user of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub name: Option<String>,
    pub authentication_scheme: Option<String>,
    pub roles: Vec<String>,
    pub claims: HashMap<String, String>,
}

impl Principal {
    pub fn authenticated(name: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            authentication_scheme: Some(scheme.into()),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authentication_scheme.is_some()
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Allowed,
    /// Not authenticated (401).
    Challenge,
    /// Authenticated but not permitted (403).
    Forbid,
}

impl AuthorizationOutcome {
    pub fn status_code(self) -> u16 {
        match self {
            Self::Allowed => 200,
            Self::Challenge => 401,
            Self::Forbid => 403,
        }
    }
}

pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, policy: &AuthorizePolicy, principal: Option<&Principal>) -> AuthorizationOutcome;
}

/// Evaluates every policy in order and stops at the first denial.
pub fn authorize(
    evaluator: &dyn PolicyEvaluator,
    policies: &[AuthorizePolicy],
    principal: Option<&Principal>,
) -> AuthorizationOutcome {
    policies
        .iter()
        .map(|policy| evaluator.evaluate(policy, principal))
        .find(|outcome| *outcome != AuthorizationOutcome::Allowed)
        .unwrap_or(AuthorizationOutcome::Allowed)
}

type PolicyRequirement = Arc<dyn Fn(&Principal) -> bool + Send + Sync>;

/// Default evaluator: authentication, scheme and role checks, plus named
/// policies registered as predicates. Unknown policy names deny.
#[derive(Clone, Default)]
pub struct RolePolicyEvaluator {
    policies: HashMap<String, PolicyRequirement>,
}

impl RolePolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(
        mut self,
        name: impl Into<String>,
        requirement: impl Fn(&Principal) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.policies.insert(name.into(), Arc::new(requirement));
        self
    }
}

impl fmt::Debug for RolePolicyEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.policies.keys().collect();
        names.sort();
        f.debug_struct("RolePolicyEvaluator")
            .field("policies", &names)
            .finish()
    }
}

impl PolicyEvaluator for RolePolicyEvaluator {
    fn evaluate(&self, policy: &AuthorizePolicy, principal: Option<&Principal>) -> AuthorizationOutcome {
        let Some(principal) = principal.filter(|p| p.is_authenticated()) else {
            return AuthorizationOutcome::Challenge;
        };
        if !policy.authentication_schemes.is_empty() {
            let scheme = principal.authentication_scheme.as_deref().unwrap_or_default();
            if !policy.authentication_schemes.iter().any(|s| s == scheme) {
                return AuthorizationOutcome::Challenge;
            }
        }
        if !policy.roles.is_empty() && !policy.roles.iter().any(|r| principal.is_in_role(r)) {
            return AuthorizationOutcome::Forbid;
        }
        if let Some(name) = &policy.policy {
            match self.policies.get(name) {
                Some(requirement) if requirement(principal) => {}
                Some(_) => return AuthorizationOutcome::Forbid,
                None => {
                    warn!(policy = %name, "authorization policy is not registered");
                    return AuthorizationOutcome::Forbid;
                }
            }
        }
        AuthorizationOutcome::Allowed
    }
}
