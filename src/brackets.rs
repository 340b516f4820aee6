use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::errors::EstimateError;
use crate::models::FilingStatus;

// Tax-year constant tables. Pure data keyed by (year, filing status);
// lookups for years we do not carry are errors, never synthesized.

/// Rates that do not vary by year within the supported range
pub const NIIT_RATE: Decimal = dec!(0.038);
pub const ADDITIONAL_MEDICARE_RATE: Decimal = dec!(0.009);
pub const REGULAR_MEDICARE_RATE: Decimal = dec!(0.0145);
pub const AMT_LOW_RATE: Decimal = dec!(0.26);
pub const AMT_HIGH_RATE: Decimal = dec!(0.28);
pub const AMT_EXEMPTION_PHASEOUT_RATE: Decimal = dec!(0.25);
pub const MENTAL_HEALTH_THRESHOLD: Decimal = dec!(1000000);
pub const MENTAL_HEALTH_RATE: Decimal = dec!(0.01);
pub const MEDICAL_AGI_FLOOR: Decimal = dec!(0.075);
pub const CHARITABLE_AGI_LIMIT: Decimal = dec!(0.60);
pub const SECTION_199A_RATE: Decimal = dec!(0.20);

/// One progressive bracket: `rate` applies to income up to `upper`
/// (open-ended for the top bracket)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub rate: Decimal,
    pub upper: Option<Decimal>,
}

/// An ordered progressive bracket schedule
#[derive(Debug, Clone, PartialEq)]
pub struct BracketTable {
    brackets: Vec<Bracket>,
}

impl BracketTable {
    fn new(rates_and_uppers: &[(Decimal, Option<Decimal>)]) -> Self {
        BracketTable {
            brackets: rates_and_uppers
                .iter()
                .map(|&(rate, upper)| Bracket { rate, upper })
                .collect(),
        }
    }

    /// Stepwise tax on `income`; zero for non-positive income
    pub fn tax(&self, income: Decimal) -> Decimal {
        if income <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let mut tax = Decimal::ZERO;
        let mut lower = Decimal::ZERO;
        for bracket in &self.brackets {
            let upper = bracket.upper.unwrap_or(income);
            if income <= lower {
                break;
            }
            let taxed_here = income.min(upper) - lower;
            if taxed_here > Decimal::ZERO {
                tax += taxed_here * bracket.rate;
            }
            lower = upper;
        }
        tax
    }

    /// Marginal rate at `income`
    pub fn marginal_rate(&self, income: Decimal) -> Decimal {
        let income = income.max(Decimal::ZERO);
        for bracket in &self.brackets {
            match bracket.upper {
                Some(upper) if income >= upper => continue,
                _ => return bracket.rate,
            }
        }
        self.brackets.last().map(|b| b.rate).unwrap_or(Decimal::ZERO)
    }
}

/// Long-term capital gain rate breakpoints: taxable income up to
/// `zero_top` pays 0%, up to `fifteen_top` pays 15%, 20% above
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LtcgBreakpoints {
    pub zero_top: Decimal,
    pub fifteen_top: Decimal,
}

/// AMT exemption, phase-out start, and the 26%/28% rate breakpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmtParams {
    pub exemption: Decimal,
    pub phaseout_start: Decimal,
    pub rate_breakpoint: Decimal,
}

/// Federal ordinary-income brackets
pub fn federal_brackets(
    year: i32,
    status: FilingStatus,
) -> Result<BracketTable, EstimateError> {
    use FilingStatus::*;
    let uppers: [Decimal; 6] = match (year, status) {
        (2023, Single) => [
            dec!(11000), dec!(44725), dec!(95375), dec!(182100), dec!(231250), dec!(578125),
        ],
        (2023, MarriedFilingJointly) => [
            dec!(22000), dec!(89450), dec!(190750), dec!(364200), dec!(462500), dec!(693750),
        ],
        (2023, MarriedFilingSeparately) => [
            dec!(11000), dec!(44725), dec!(95375), dec!(182100), dec!(231250), dec!(346875),
        ],
        (2023, HeadOfHousehold) => [
            dec!(15700), dec!(59850), dec!(95350), dec!(182100), dec!(231250), dec!(578100),
        ],
        (2024, Single) => [
            dec!(11600), dec!(47150), dec!(100525), dec!(191950), dec!(243725), dec!(609350),
        ],
        (2024, MarriedFilingJointly) => [
            dec!(23200), dec!(94300), dec!(201050), dec!(383900), dec!(487450), dec!(731200),
        ],
        (2024, MarriedFilingSeparately) => [
            dec!(11600), dec!(47150), dec!(100525), dec!(191950), dec!(243725), dec!(365600),
        ],
        (2024, HeadOfHousehold) => [
            dec!(16550), dec!(63100), dec!(100500), dec!(191950), dec!(243700), dec!(609350),
        ],
        (2025, Single) => [
            dec!(11925), dec!(48475), dec!(103350), dec!(197300), dec!(250525), dec!(626350),
        ],
        (2025, MarriedFilingJointly) => [
            dec!(23850), dec!(96950), dec!(206700), dec!(394600), dec!(501050), dec!(751600),
        ],
        (2025, MarriedFilingSeparately) => [
            dec!(11925), dec!(48475), dec!(103350), dec!(197300), dec!(250525), dec!(375800),
        ],
        (2025, HeadOfHousehold) => [
            dec!(17000), dec!(64850), dec!(103350), dec!(197300), dec!(250500), dec!(626350),
        ],
        _ => return Err(EstimateError::MissingBracketTable { year, status }),
    };
    let rates = [
        dec!(0.10), dec!(0.12), dec!(0.22), dec!(0.24), dec!(0.32), dec!(0.35), dec!(0.37),
    ];
    let mut schedule: Vec<(Decimal, Option<Decimal>)> = rates[..6]
        .iter()
        .zip(uppers.iter())
        .map(|(&rate, &upper)| (rate, Some(upper)))
        .collect();
    schedule.push((rates[6], None));
    Ok(BracketTable::new(&schedule))
}

/// Federal standard deduction
pub fn standard_deduction(year: i32, status: FilingStatus) -> Result<Decimal, EstimateError> {
    use FilingStatus::*;
    let amount = match (year, status) {
        (2023, Single) | (2023, MarriedFilingSeparately) => dec!(13850),
        (2023, MarriedFilingJointly) => dec!(27700),
        (2023, HeadOfHousehold) => dec!(20800),
        (2024, Single) | (2024, MarriedFilingSeparately) => dec!(14600),
        (2024, MarriedFilingJointly) => dec!(29200),
        (2024, HeadOfHousehold) => dec!(21900),
        (2025, Single) | (2025, MarriedFilingSeparately) => dec!(15750),
        (2025, MarriedFilingJointly) => dec!(31500),
        (2025, HeadOfHousehold) => dec!(23625),
        _ => return Err(EstimateError::MissingBracketTable { year, status }),
    };
    Ok(amount)
}

/// Long-term capital gain / qualified dividend rate breakpoints
pub fn ltcg_breakpoints(
    year: i32,
    status: FilingStatus,
) -> Result<LtcgBreakpoints, EstimateError> {
    use FilingStatus::*;
    let (zero_top, fifteen_top) = match (year, status) {
        (2023, Single) => (dec!(44625), dec!(492300)),
        (2023, MarriedFilingJointly) => (dec!(89250), dec!(553850)),
        (2023, MarriedFilingSeparately) => (dec!(44625), dec!(276900)),
        (2023, HeadOfHousehold) => (dec!(59750), dec!(523050)),
        (2024, Single) => (dec!(47025), dec!(518900)),
        (2024, MarriedFilingJointly) => (dec!(94050), dec!(583750)),
        (2024, MarriedFilingSeparately) => (dec!(47025), dec!(291850)),
        (2024, HeadOfHousehold) => (dec!(63000), dec!(551350)),
        (2025, Single) => (dec!(48350), dec!(533400)),
        (2025, MarriedFilingJointly) => (dec!(96700), dec!(600050)),
        (2025, MarriedFilingSeparately) => (dec!(48350), dec!(300000)),
        (2025, HeadOfHousehold) => (dec!(64750), dec!(566700)),
        _ => return Err(EstimateError::MissingBracketTable { year, status }),
    };
    Ok(LtcgBreakpoints {
        zero_top,
        fifteen_top,
    })
}

/// AMT exemption, phase-out start, and 26%/28% breakpoint
pub fn amt_params(year: i32, status: FilingStatus) -> Result<AmtParams, EstimateError> {
    use FilingStatus::*;
    let (exemption, phaseout_start) = match (year, status) {
        (2023, Single) | (2023, HeadOfHousehold) => (dec!(81300), dec!(578150)),
        (2023, MarriedFilingJointly) => (dec!(126500), dec!(1156300)),
        (2023, MarriedFilingSeparately) => (dec!(63250), dec!(578150)),
        (2024, Single) | (2024, HeadOfHousehold) => (dec!(85700), dec!(609350)),
        (2024, MarriedFilingJointly) => (dec!(133300), dec!(1218700)),
        (2024, MarriedFilingSeparately) => (dec!(66650), dec!(609350)),
        (2025, Single) | (2025, HeadOfHousehold) => (dec!(88100), dec!(626350)),
        (2025, MarriedFilingJointly) => (dec!(137000), dec!(1252700)),
        (2025, MarriedFilingSeparately) => (dec!(68500), dec!(626350)),
        _ => return Err(EstimateError::MissingBracketTable { year, status }),
    };
    let full_breakpoint = match year {
        2023 => dec!(220700),
        2024 => dec!(232600),
        2025 => dec!(239100),
        _ => return Err(EstimateError::MissingAmtBreakpoint { year }),
    };
    let rate_breakpoint = if status == MarriedFilingSeparately {
        full_breakpoint / dec!(2)
    } else {
        full_breakpoint
    };
    Ok(AmtParams {
        exemption,
        phaseout_start,
        rate_breakpoint,
    })
}

/// MAGI threshold for the 3.8% net-investment-income tax
pub fn niit_threshold(status: FilingStatus) -> Decimal {
    match status {
        FilingStatus::MarriedFilingJointly => dec!(250000),
        FilingStatus::MarriedFilingSeparately => dec!(125000),
        FilingStatus::Single | FilingStatus::HeadOfHousehold => dec!(200000),
    }
}

/// Medicare-wage threshold for the 0.9% additional Medicare tax
pub fn additional_medicare_threshold(status: FilingStatus) -> Decimal {
    match status {
        FilingStatus::MarriedFilingJointly => dec!(250000),
        FilingStatus::MarriedFilingSeparately => dec!(125000),
        FilingStatus::Single | FilingStatus::HeadOfHousehold => dec!(200000),
    }
}

/// Schedule A state-and-local-tax deduction cap
pub fn salt_cap(status: FilingStatus) -> Decimal {
    match status {
        FilingStatus::MarriedFilingSeparately => dec!(5000),
        _ => dec!(10000),
    }
}

/// Deductible net-capital-loss cap
pub fn capital_loss_cap(status: FilingStatus) -> Decimal {
    match status {
        FilingStatus::MarriedFilingSeparately => dec!(1500),
        _ => dec!(3000),
    }
}

/// Foreign tax creditable without Form 1116 below this aggregate
pub fn ftc_de_minimis(status: FilingStatus) -> Decimal {
    match status {
        FilingStatus::MarriedFilingJointly => dec!(600),
        _ => dec!(300),
    }
}

/// California ordinary-income brackets. California taxes capital gains at
/// these same rates; there is no preferential schedule.
pub fn california_brackets(
    year: i32,
    status: FilingStatus,
) -> Result<BracketTable, EstimateError> {
    use FilingStatus::*;
    let uppers: [Decimal; 8] = match (year, status) {
        (2023, Single) | (2023, MarriedFilingSeparately) => [
            dec!(10099), dec!(23942), dec!(37788), dec!(52455),
            dec!(66295), dec!(338639), dec!(406364), dec!(677275),
        ],
        (2023, MarriedFilingJointly) => [
            dec!(20198), dec!(47884), dec!(75576), dec!(104910),
            dec!(132590), dec!(677278), dec!(812728), dec!(1354550),
        ],
        (2023, HeadOfHousehold) => [
            dec!(20212), dec!(47887), dec!(61730), dec!(76397),
            dec!(90240), dec!(460547), dec!(552658), dec!(921095),
        ],
        (2024, Single) | (2024, MarriedFilingSeparately) => [
            dec!(10756), dec!(25499), dec!(40245), dec!(55866),
            dec!(70606), dec!(360659), dec!(432787), dec!(721314),
        ],
        (2024, MarriedFilingJointly) => [
            dec!(21512), dec!(50998), dec!(80490), dec!(111732),
            dec!(141212), dec!(721318), dec!(865574), dec!(1442628),
        ],
        (2024, HeadOfHousehold) => [
            dec!(21527), dec!(51000), dec!(65744), dec!(81364),
            dec!(96107), dec!(490493), dec!(588593), dec!(980987),
        ],
        (2025, Single) | (2025, MarriedFilingSeparately) => [
            dec!(10876), dec!(25770), dec!(40671), dec!(56459),
            dec!(71357), dec!(364504), dec!(437401), dec!(729004),
        ],
        (2025, MarriedFilingJointly) => [
            dec!(21752), dec!(51540), dec!(81342), dec!(112918),
            dec!(142714), dec!(729008), dec!(874802), dec!(1458008),
        ],
        (2025, HeadOfHousehold) => [
            dec!(21762), dec!(51550), dec!(66451), dec!(82239),
            dec!(97142), dec!(495775), dec!(594931), dec!(991755),
        ],
        _ => return Err(EstimateError::MissingBracketTable { year, status }),
    };
    let rates = [
        dec!(0.01), dec!(0.02), dec!(0.04), dec!(0.06), dec!(0.08),
        dec!(0.093), dec!(0.103), dec!(0.113), dec!(0.123),
    ];
    let mut schedule: Vec<(Decimal, Option<Decimal>)> = rates[..8]
        .iter()
        .zip(uppers.iter())
        .map(|(&rate, &upper)| (rate, Some(upper)))
        .collect();
    schedule.push((rates[8], None));
    Ok(BracketTable::new(&schedule))
}

/// California standard deduction
pub fn ca_standard_deduction(year: i32, status: FilingStatus) -> Result<Decimal, EstimateError> {
    use FilingStatus::*;
    let amount = match (year, status) {
        (2023, Single) | (2023, MarriedFilingSeparately) => dec!(5363),
        (2023, MarriedFilingJointly) | (2023, HeadOfHousehold) => dec!(10726),
        (2024, Single) | (2024, MarriedFilingSeparately) => dec!(5540),
        (2024, MarriedFilingJointly) | (2024, HeadOfHousehold) => dec!(11080),
        (2025, Single) | (2025, MarriedFilingSeparately) => dec!(5601),
        (2025, MarriedFilingJointly) | (2025, HeadOfHousehold) => dec!(11202),
        _ => return Err(EstimateError::MissingBracketTable { year, status }),
    };
    Ok(amount)
}
