use rust_decimal::Decimal;

use crate::models::{Lot, Sale, Security};

// Sale-to-lot allocation. The matcher is read-only: it reports which lots
// a sale should consume and how many shares from each; decrementing
// `shares_remaining` is the orchestrator's job.

/// How lots are chosen for a sale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Oldest acquisition first (the default)
    Fifo,
    /// Caller names the lot ids, in consumption order
    Specific(Vec<String>),
}

/// One (lot, shares) slice of an allocation
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub lot_id: String,
    pub shares: Decimal,
}

/// Outcome of matching one sale against its candidate lots
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub allocations: Vec<Allocation>,
    /// Shares the candidates could not cover; zero on a full match
    pub unallocated: Decimal,
}

impl MatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.unallocated == Decimal::ZERO
    }
}

/// Filter `lots` to candidates for `security`, in consumption order.
///
/// Exact ticker match wins. When the sale's ticker is unknown, falls back
/// to normalized-name overlap, then to every lot with remaining shares.
pub fn candidate_lots<'a>(lots: &'a [Lot], security: &Security) -> Vec<&'a Lot> {
    let mut candidates: Vec<&Lot> = if security.has_known_ticker() {
        lots.iter()
            .filter(|lot| lot.security.ticker == security.ticker && !lot.is_exhausted())
            .collect()
    } else {
        Vec::new()
    };

    if candidates.is_empty() {
        let wanted = security.normalized_name();
        if !wanted.is_empty() {
            candidates = lots
                .iter()
                .filter(|lot| !lot.is_exhausted())
                .filter(|lot| {
                    let have = lot.security.normalized_name();
                    have == wanted || have.contains(&wanted) || wanted.contains(&have)
                })
                .collect();
        }
    }

    if candidates.is_empty() && !security.has_known_ticker() {
        candidates = lots.iter().filter(|lot| !lot.is_exhausted()).collect();
    }

    candidates.sort_by(|a, b| {
        a.acquisition_date
            .cmp(&b.acquisition_date)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
}

/// Allocate `sale.shares` across `candidates` under `policy`.
///
/// Candidates are consumed in the order given (FIFO order from
/// [`candidate_lots`], or the caller's order for specific identification).
/// When the candidates run short the allocation is returned partial and
/// `unallocated` carries the shortfall.
pub fn match_sale(candidates: &[&Lot], sale: &Sale, policy: &MatchPolicy) -> MatchOutcome {
    let ordered: Vec<&Lot> = match policy {
        MatchPolicy::Fifo => candidates.to_vec(),
        MatchPolicy::Specific(ids) => ids
            .iter()
            .filter_map(|id| candidates.iter().find(|lot| &lot.id == id).copied())
            .collect(),
    };

    let mut remaining = sale.shares;
    let mut allocations = Vec::new();
    for lot in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        if lot.shares_remaining <= Decimal::ZERO {
            continue;
        }
        let take = remaining.min(lot.shares_remaining);
        allocations.push(Allocation {
            lot_id: lot.id.clone(),
            shares: take,
        });
        remaining -= take;
    }

    MatchOutcome {
        allocations,
        unallocated: remaining.max(Decimal::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EquityClass, LotBasis};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lot(id: &str, ticker: &str, name: &str, acquired: NaiveDate, shares: Decimal) -> Lot {
        Lot::new(
            id.to_string(),
            EquityClass::Rsu,
            Security::new(ticker, name),
            acquired,
            shares,
            LotBasis::Regular {
                cost_per_share: dec!(100),
            },
            format!("evt-{}", id),
            "test".to_string(),
        )
        .unwrap()
    }

    fn sale(ticker: &str, name: &str, shares: Decimal) -> Sale {
        Sale {
            id: "sale-1".to_string(),
            lot_id: None,
            security: Security::new(ticker, name),
            sale_date: date(2025, 6, 1),
            shares,
            proceeds_per_share: dec!(150),
            broker_reported_basis: None,
            wash_sale_disallowed: Decimal::ZERO,
            received_1099: true,
            basis_reported_to_irs: false,
            origin: "test".to_string(),
        }
    }

    #[test]
    fn test_fifo_consumes_oldest_first() {
        let lots = vec![
            lot("b", "ACME", "Acme Corp", date(2024, 6, 1), dec!(50)),
            lot("a", "ACME", "Acme Corp", date(2024, 1, 1), dec!(30)),
        ];
        let sale = sale("ACME", "Acme Corp", dec!(60));
        let candidates = candidate_lots(&lots, &sale.security);
        let outcome = match_sale(&candidates, &sale, &MatchPolicy::Fifo);

        assert!(outcome.is_complete());
        assert_eq!(outcome.allocations.len(), 2);
        assert_eq!(outcome.allocations[0].lot_id, "a");
        assert_eq!(outcome.allocations[0].shares, dec!(30));
        assert_eq!(outcome.allocations[1].lot_id, "b");
        assert_eq!(outcome.allocations[1].shares, dec!(30));
    }

    #[test]
    fn test_partial_allocation_reports_shortfall() {
        let lots = vec![lot("a", "ACME", "Acme Corp", date(2024, 1, 1), dec!(25))];
        let sale = sale("ACME", "Acme Corp", dec!(100));
        let candidates = candidate_lots(&lots, &sale.security);
        let outcome = match_sale(&candidates, &sale, &MatchPolicy::Fifo);

        assert!(!outcome.is_complete());
        assert_eq!(outcome.unallocated, dec!(75));
        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(outcome.allocations[0].shares, dec!(25));
    }

    #[test]
    fn test_specific_identification_order() {
        let lots = vec![
            lot("a", "ACME", "Acme Corp", date(2024, 1, 1), dec!(50)),
            lot("b", "ACME", "Acme Corp", date(2024, 6, 1), dec!(50)),
        ];
        let sale = sale("ACME", "Acme Corp", dec!(60));
        let candidates = candidate_lots(&lots, &sale.security);
        let policy = MatchPolicy::Specific(vec!["b".to_string(), "a".to_string()]);
        let outcome = match_sale(&candidates, &sale, &policy);

        assert!(outcome.is_complete());
        assert_eq!(outcome.allocations[0].lot_id, "b");
        assert_eq!(outcome.allocations[0].shares, dec!(50));
        assert_eq!(outcome.allocations[1].lot_id, "a");
        assert_eq!(outcome.allocations[1].shares, dec!(10));
    }

    #[test]
    fn test_unknown_ticker_matches_by_name() {
        let lots = vec![
            lot("a", "ACME", "Acme Widgets, Inc.", date(2024, 1, 1), dec!(40)),
            lot("z", "ZZZZ", "Other Corp", date(2024, 1, 1), dec!(40)),
        ];
        let sale = sale("UNKNOWN", "Acme Widgets Inc", dec!(10));
        let candidates = candidate_lots(&lots, &sale.security);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "a");
    }

    #[test]
    fn test_exhausted_lots_are_skipped() {
        let mut spent = lot("a", "ACME", "Acme Corp", date(2024, 1, 1), dec!(50));
        spent.shares_remaining = Decimal::ZERO;
        let lots = vec![
            spent,
            lot("b", "ACME", "Acme Corp", date(2024, 6, 1), dec!(50)),
        ];
        let sale = sale("ACME", "Acme Corp", dec!(20));
        let candidates = candidate_lots(&lots, &sale.security);
        let outcome = match_sale(&candidates, &sale, &MatchPolicy::Fifo);

        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(outcome.allocations[0].lot_id, "b");
    }

    #[test]
    fn test_no_candidates_for_unmatched_ticker() {
        let lots = vec![lot("a", "ACME", "Acme Corp", date(2024, 1, 1), dec!(50))];
        let sale = sale("OTHR", "Other Corp", dec!(20));
        let candidates = candidate_lots(&lots, &sale.security);
        assert!(candidates.is_empty());
    }
}
