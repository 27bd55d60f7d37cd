//! Access policy: which plans may enter which categories and collect which
//! kits.
//!
//! Everything here is pure. It is the only thing standing between a
//! participant and an event they did not pay for, so the check-in, scan and kit
//! workflows all call into this module rather than re-deriving the rules.

use crate::types::{KitDay, RegistrationPlan, TargetCategory};
use serde::Serialize;
use std::fmt;

/// Why entry was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DenyReason {
    /// Workshop-only plan at a non-workshop event
    WorkshopPlanCannotAccessEvents,
    /// General plan at a workshop
    GeneralPlanCannotAccessWorkshops,
    /// Plan value not recognised
    InvalidPlan,
}

impl DenyReason {
    /// Stable reason code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::WorkshopPlanCannotAccessEvents => "workshop-plan-cannot-access-events",
            Self::GeneralPlanCannotAccessWorkshops => "general-plan-cannot-access-workshops",
            Self::InvalidPlan => "invalid-plan",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A denied entry, with what a desk volunteer needs to explain it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccessDenial {
    /// Reason code
    pub reason: DenyReason,
    /// Plan as presented (the raw value when it was not a known plan)
    pub plan: String,
    /// Category that was requested
    pub category: TargetCategory,
    /// Plans that would have been admitted
    pub required_plans: Vec<RegistrationPlan>,
}

impl AccessDenial {
    /// Sentence for the person at the desk
    #[must_use]
    pub fn message(&self) -> String {
        if self.reason == DenyReason::InvalidPlan {
            return format!(
                "Registration plan {:?} is not recognised; the registration needs to be corrected by an admin",
                self.plan
            );
        }
        format!(
            "Participant is registered for the {} plan; {} entry requires the {} plan",
            self.plan,
            self.category,
            join_plans(&self.required_plans),
        )
    }
}

impl fmt::Display for AccessDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.reason)
    }
}

/// Outcome of [`can_attend`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum AccessDecision {
    /// Entry allowed
    Allow,
    /// Entry denied
    Deny(AccessDenial),
}

impl AccessDecision {
    /// Whether entry is allowed
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert into a `Result`, handy with `?`.
    ///
    /// # Errors
    ///
    /// The denial, when entry is denied.
    pub fn into_result(self) -> Result<(), AccessDenial> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(denial) => Err(denial),
        }
    }
}

/// Decide whether `plan` may attend a target of `category`.
///
/// | plan | admitted categories |
/// |---|---|
/// | workshop | workshop |
/// | general | technical, non-technical, special |
/// | both | all |
#[must_use]
pub fn can_attend(plan: RegistrationPlan, category: TargetCategory) -> AccessDecision {
    let denied = |reason| {
        AccessDecision::Deny(AccessDenial {
            reason,
            plan: plan.as_str().to_string(),
            category,
            required_plans: plans_for_category(category).to_vec(),
        })
    };

    match (plan, category) {
        (RegistrationPlan::Both, _)
        | (RegistrationPlan::Workshop, TargetCategory::Workshop)
        | (
            RegistrationPlan::General,
            TargetCategory::Technical | TargetCategory::NonTechnical | TargetCategory::Special,
        ) => AccessDecision::Allow,
        (RegistrationPlan::Workshop, _) => denied(DenyReason::WorkshopPlanCannotAccessEvents),
        (RegistrationPlan::General, TargetCategory::Workshop) => {
            denied(DenyReason::GeneralPlanCannotAccessWorkshops)
        },
    }
}

/// [`can_attend`] for a plan that has not been parsed yet (a QR prefix, a row
/// read from an older schema). Unknown values are denied with
/// [`DenyReason::InvalidPlan`].
#[must_use]
pub fn can_attend_raw(plan: &str, category: TargetCategory) -> AccessDecision {
    plan.parse::<RegistrationPlan>().map_or_else(
        |_| {
            AccessDecision::Deny(AccessDenial {
                reason: DenyReason::InvalidPlan,
                plan: plan.to_string(),
                category,
                required_plans: plans_for_category(category).to_vec(),
            })
        },
        |plan| can_attend(plan, category),
    )
}

/// Whether `plan` is entitled to a kit on `day`.
#[must_use]
pub fn kit_eligibility(plan: RegistrationPlan, day: KitDay) -> bool {
    plans_for_kit_day(day).contains(&plan)
}

/// Plans admitted to `category`
#[must_use]
pub const fn plans_for_category(category: TargetCategory) -> &'static [RegistrationPlan] {
    match category {
        TargetCategory::Workshop => &[RegistrationPlan::Workshop, RegistrationPlan::Both],
        TargetCategory::Technical | TargetCategory::NonTechnical | TargetCategory::Special => {
            &[RegistrationPlan::General, RegistrationPlan::Both]
        },
    }
}

/// Plans entitled to a kit on `day`
#[must_use]
pub const fn plans_for_kit_day(day: KitDay) -> &'static [RegistrationPlan] {
    match day {
        KitDay::Workshop => &[RegistrationPlan::Workshop, RegistrationPlan::Both],
        KitDay::Events => &[RegistrationPlan::General, RegistrationPlan::Both],
    }
}

/// Categories `plan` may attend, in display order
#[must_use]
pub fn allowed_categories(plan: RegistrationPlan) -> Vec<TargetCategory> {
    TargetCategory::ALL
        .into_iter()
        .filter(|category| can_attend(plan, *category).is_allowed())
        .collect()
}

pub(crate) fn join_plans(plans: &[RegistrationPlan]) -> String {
    plans
        .iter()
        .map(|plan| plan.as_str())
        .collect::<Vec<_>>()
        .join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_plan_enters_workshops() {
        assert_eq!(
            can_attend(RegistrationPlan::Both, TargetCategory::Workshop),
            AccessDecision::Allow
        );
    }

    #[test]
    fn general_plan_denied_at_workshops_with_explanation() {
        let AccessDecision::Deny(denial) =
            can_attend(RegistrationPlan::General, TargetCategory::Workshop)
        else {
            unreachable!("general plan must not enter workshops");
        };
        assert_eq!(denial.reason.code(), "general-plan-cannot-access-workshops");
        assert_eq!(
            denial.required_plans,
            vec![RegistrationPlan::Workshop, RegistrationPlan::Both]
        );
        assert_eq!(
            denial.message(),
            "Participant is registered for the general plan; workshop entry requires the workshop or both plan"
        );
    }

    #[test]
    fn raw_plan_values_fail_closed() {
        let decision = can_attend_raw("vip", TargetCategory::Special);
        assert!(matches!(
            decision,
            AccessDecision::Deny(AccessDenial { reason: DenyReason::InvalidPlan, .. })
        ));
        assert!(can_attend_raw("both", TargetCategory::Special).is_allowed());
    }

    #[test]
    fn allowed_categories_per_plan() {
        assert_eq!(
            allowed_categories(RegistrationPlan::Workshop),
            vec![TargetCategory::Workshop]
        );
        assert_eq!(allowed_categories(RegistrationPlan::General).len(), 3);
        assert_eq!(allowed_categories(RegistrationPlan::Both).len(), 4);
    }
}
