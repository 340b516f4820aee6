use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::brackets::{self, CHARITABLE_AGI_LIMIT, MEDICAL_AGI_FLOOR};
use crate::models::{FilingStatus, ItemizedDeductions};

// Schedule A assembly. Federal and California disagree on what counts:
// the federal side caps state-and-local taxes and honors the full
// schedule; California ignores its own income tax, has no SALT cap, and
// picks up only property taxes.

/// Box-14 labels treated as voluntary-plan / state disability, which
/// counts as state income tax paid on the federal schedule
const DISABILITY_LABELS: [&str; 4] = ["VPDI", "CA VPDI", "SDI", "CA SDI"];

/// Assembled federal Schedule A amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederalItemized {
    /// Medical above the 7.5%-of-AGI floor
    pub medical_allowed: Decimal,
    pub salt_uncapped: Decimal,
    pub salt_deducted: Decimal,
    pub interest: Decimal,
    pub charitable_allowed: Decimal,
    /// Charitable excess above the AGI limit, usable next year
    pub charitable_carryover_out: Decimal,
    pub casualty: Decimal,
    pub other: Decimal,
    pub total: Decimal,
}

/// Assembled California itemized amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaliforniaItemized {
    pub medical_allowed: Decimal,
    /// Real-estate and personal-property tax only; California income tax
    /// is never deductible against itself and there is no cap
    pub property_taxes: Decimal,
    pub interest: Decimal,
    pub charitable_allowed: Decimal,
    pub casualty: Decimal,
    pub other: Decimal,
    pub total: Decimal,
}

/// Pull disability-plan amounts out of a W-2 box-14 map. Labels other
/// than the known synonyms are surfaced as warnings, never guessed.
pub fn disability_from_box14(box14: &BTreeMap<String, Decimal>) -> (Decimal, Vec<String>) {
    let mut total = Decimal::ZERO;
    let mut warnings = Vec::new();
    for (label, amount) in box14 {
        let normalized = label.trim().to_uppercase();
        if DISABILITY_LABELS.contains(&normalized.as_str()) {
            total += *amount;
        } else if normalized.contains("DI") {
            warnings.push(format!(
                "Unrecognized box-14 label {:?} ({}); not treated as disability insurance",
                label, amount
            ));
        }
    }
    (total, warnings)
}

/// Assemble the federal Schedule A from raw inputs.
///
/// `disability_paid` is the box-14 VPDI/SDI total, which rides along
/// with state income tax under the SALT cap.
pub fn assemble_federal(
    itemized: &ItemizedDeductions,
    agi: Decimal,
    status: FilingStatus,
    disability_paid: Decimal,
) -> FederalItemized {
    let medical_allowed = (itemized.medical - MEDICAL_AGI_FLOOR * agi).max(Decimal::ZERO);

    let salt_uncapped = itemized.state_income_tax
        + disability_paid
        + itemized.real_estate_tax
        + itemized.personal_property_tax;
    let salt_deducted = salt_uncapped.min(brackets::salt_cap(status));

    let interest =
        itemized.mortgage_interest + itemized.mortgage_points + itemized.investment_interest;

    let charitable_total =
        itemized.charitable_cash + itemized.charitable_noncash + itemized.charitable_carryover;
    let charitable_allowed = charitable_total.min(CHARITABLE_AGI_LIMIT * agi);
    let charitable_carryover_out = charitable_total - charitable_allowed;

    let total = medical_allowed
        + salt_deducted
        + interest
        + charitable_allowed
        + itemized.casualty_loss
        + itemized.other;

    FederalItemized {
        medical_allowed,
        salt_uncapped,
        salt_deducted,
        interest,
        charitable_allowed,
        charitable_carryover_out,
        casualty: itemized.casualty_loss,
        other: itemized.other,
        total,
    }
}

/// Assemble the California itemized total from the same raw inputs
pub fn assemble_california(itemized: &ItemizedDeductions, ca_agi: Decimal) -> CaliforniaItemized {
    let medical_allowed = (itemized.medical - MEDICAL_AGI_FLOOR * ca_agi).max(Decimal::ZERO);
    let property_taxes = itemized.real_estate_tax + itemized.personal_property_tax;
    let interest =
        itemized.mortgage_interest + itemized.mortgage_points + itemized.investment_interest;
    let charitable_total =
        itemized.charitable_cash + itemized.charitable_noncash + itemized.charitable_carryover;
    let charitable_allowed = charitable_total.min(CHARITABLE_AGI_LIMIT * ca_agi);

    let total = medical_allowed
        + property_taxes
        + interest
        + charitable_allowed
        + itemized.casualty_loss
        + itemized.other;

    CaliforniaItemized {
        medical_allowed,
        property_taxes,
        interest,
        charitable_allowed,
        casualty: itemized.casualty_loss,
        other: itemized.other,
        total,
    }
}
