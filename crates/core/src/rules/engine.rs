//! The rule engine: fetch, filter, order, and apply mapping rules.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::context::{keys, RuleContext};
use super::{condition, transform};
use crate::errors::StoreError;
use crate::models::{Claim, MappingDirection, MappingRule, RuleType};
use crate::store::{sort_by_priority, RuleStore};

/// What batch transforms do with elements no rule matched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    #[default]
    Drop,
    PassThrough,
}

/// Translates claims and roles between an application's vocabulary and the
/// centralized one.
///
/// Per element, the first enabled rule (ascending priority) whose source
/// identifier matches and whose condition passes decides the result. Rule
/// errors never escape: a failing element simply has no match.
pub struct RuleEngine {
    rules: Arc<dyn RuleStore>,
}

impl RuleEngine {
    pub fn new(rules: Arc<dyn RuleStore>) -> Self {
        Self { rules }
    }

    /// Translate one claim. `None` means no rule matched.
    pub async fn transform_claim(
        &self,
        application_id: &str,
        source: &Claim,
        direction: MappingDirection,
        ctx: &mut RuleContext,
    ) -> Option<Claim> {
        ctx.insert(keys::SOURCE_CLAIM, source.clone());
        ctx.insert(keys::SOURCE_CLAIM_TYPE, source.claim_type.as_str());
        ctx.insert(keys::SOURCE_CLAIM_VALUE, source.value.as_str());

        let rules = self
            .candidate_rules(application_id, RuleType::Claim, direction, &source.claim_type)
            .await?;
        let rule = first_match(&rules, ctx)?;

        let value = match rule.transform_expression.as_deref() {
            Some(expr) if !expr.is_empty() => transform::apply(&source.value, expr, ctx),
            _ => source.value.clone(),
        };

        info!(
            application_id,
            rule_id = %rule.id,
            source_type = %source.claim_type,
            target_type = %rule.target_identifier,
            "claim mapped"
        );
        Some(Claim::new(rule.target_identifier.clone(), value))
    }

    /// Translate one role name. `None` means no rule matched.
    ///
    /// The result is the rule's target identifier, or the rule's transform
    /// applied to the source role when it has one.
    pub async fn transform_role(
        &self,
        application_id: &str,
        source: &str,
        direction: MappingDirection,
        ctx: &mut RuleContext,
    ) -> Option<String> {
        if source.is_empty() {
            return None;
        }
        ctx.insert(keys::SOURCE_ROLE, source);

        let rules = self
            .candidate_rules(application_id, RuleType::Role, direction, source)
            .await?;
        let rule = first_match(&rules, ctx)?;

        let target = match rule.transform_expression.as_deref() {
            Some(expr) if !expr.is_empty() => transform::apply(source, expr, ctx),
            _ => rule.target_identifier.clone(),
        };

        info!(
            application_id,
            rule_id = %rule.id,
            source_role = source,
            target_role = %target,
            "role mapped"
        );
        Some(target)
    }

    /// Translate a batch of claims sharing one context. The full input is
    /// visible to conditions as `sourceClaims`.
    pub async fn transform_claims(
        &self,
        application_id: &str,
        sources: &[Claim],
        direction: MappingDirection,
        policy: UnmappedPolicy,
        ctx: &mut RuleContext,
    ) -> Vec<Claim> {
        if sources.is_empty() {
            return Vec::new();
        }
        ctx.insert(keys::SOURCE_CLAIMS, sources.to_vec());

        let mut out = Vec::with_capacity(sources.len());
        for source in sources {
            match self.transform_claim(application_id, source, direction, ctx).await {
                Some(mapped) => out.push(mapped),
                None if policy == UnmappedPolicy::PassThrough => out.push(source.clone()),
                None => debug!(application_id, claim_type = %source.claim_type, "claim unmapped, dropped"),
            }
        }
        out
    }

    /// Translate a batch of roles sharing one context. The full input is
    /// visible to conditions as `sourceRoles`. Roles that map to an empty
    /// name count as unmapped.
    pub async fn transform_roles(
        &self,
        application_id: &str,
        sources: &[String],
        direction: MappingDirection,
        policy: UnmappedPolicy,
        ctx: &mut RuleContext,
    ) -> Vec<String> {
        if sources.is_empty() {
            return Vec::new();
        }
        ctx.insert(keys::SOURCE_ROLES, sources.to_vec());

        let mut out = Vec::with_capacity(sources.len());
        for source in sources {
            match self.transform_role(application_id, source, direction, ctx).await {
                Some(mapped) if !mapped.is_empty() => out.push(mapped),
                _ if policy == UnmappedPolicy::PassThrough => out.push(source.clone()),
                _ => debug!(application_id, role = %source, "role unmapped, dropped"),
            }
        }
        out
    }

    /// See [`condition::evaluate`].
    pub fn evaluate_condition(&self, condition: &str, ctx: &RuleContext) -> bool {
        condition::evaluate(condition, ctx)
    }

    /// See [`transform::apply`].
    pub fn apply_transformation(&self, value: &str, expression: &str, ctx: &RuleContext) -> String {
        transform::apply(value, expression, ctx)
    }

    /// Enabled rules for this element, ordered. `None` if the store failed.
    async fn candidate_rules(
        &self,
        application_id: &str,
        rule_type: RuleType,
        direction: MappingDirection,
        identifier: &str,
    ) -> Option<Vec<MappingRule>> {
        match self.fetch_rules(application_id, rule_type, direction).await {
            Ok(mut rules) => {
                rules.retain(|r| {
                    r.is_enabled && r.direction.applies_to(direction) && r.matches_source(identifier)
                });
                sort_by_priority(&mut rules);
                Some(rules)
            }
            Err(e) => {
                error!(
                    application_id,
                    %rule_type,
                    identifier,
                    error = %e,
                    "failed to load mapping rules, treating element as unmapped"
                );
                None
            }
        }
    }

    async fn fetch_rules(
        &self,
        application_id: &str,
        rule_type: RuleType,
        direction: MappingDirection,
    ) -> Result<Vec<MappingRule>, StoreError> {
        self.rules
            .get_by_type_and_direction(application_id, rule_type, direction)
            .await
    }
}

/// The first rule whose condition passes.
fn first_match<'a>(rules: &'a [MappingRule], ctx: &RuleContext) -> Option<&'a MappingRule> {
    rules.iter().find(|rule| match rule.condition.as_deref() {
        None | Some("") => true,
        Some(cond) => {
            let passed = condition::evaluate(cond, ctx);
            if !passed {
                debug!(rule_id = %rule.id, condition = cond, "rule condition not met, skipping");
            }
            passed
        }
    })
}
