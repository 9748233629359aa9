//! Rule matching: does a rule's static scope cover an issue?
//!
//! Allow-lists in [`RuleConditions`](crate::models::RuleConditions) narrow the
//! scope, deny-lists in [`RuleFilters`](crate::models::RuleFilters) carve
//! exceptions out of it. An empty list never restricts anything.

use crate::models::{AlertRule, Issue};

/// Decide whether `rule` applies to `issue`.
///
/// Pure and total: every populated allow-list must contain the issue's value,
/// and no populated deny-list may contain it.
#[must_use]
pub fn applies(rule: &AlertRule, issue: &Issue) -> bool {
    allowed(rule, issue) && !excluded(rule, issue)
}

fn allowed(rule: &AlertRule, issue: &Issue) -> bool {
    let conditions = &rule.conditions;

    allows(&conditions.project_keys, &issue.project_key)
        && allows(&conditions.issue_types, &issue.issue_type)
        && allows(&conditions.statuses, &issue.status)
        && (conditions.assignee_ids.is_empty()
            || issue
                .assignee_id
                .as_ref()
                .is_some_and(|assignee| conditions.assignee_ids.contains(assignee)))
}

fn excluded(rule: &AlertRule, issue: &Issue) -> bool {
    let filters = &rule.filters;

    contains_name(&filters.exclude_statuses, &issue.status)
        || contains_name(&filters.exclude_issue_types, &issue.issue_type)
        || issue
            .labels
            .iter()
            .any(|label| contains_name(&filters.exclude_labels, label))
        || (filters.only_if_assigned && !issue.is_assigned())
}

fn allows(list: &[String], value: &str) -> bool {
    list.is_empty() || contains_name(list, value)
}

fn contains_name(list: &[String], value: &str) -> bool {
    list.iter().any(|entry| entry.eq_ignore_ascii_case(value))
}
