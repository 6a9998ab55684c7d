//! Property-based tests for the exposure and distribution math.
//!
//! These tests verify invariants hold under random inputs.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use wager_ledger::exposure::{
    exposure, exposure_delta, fast_estimate, required_lock, ExposureLeg,
};
use wager_ledger::hierarchy::{ancestors, plan_distribution};
use wager_ledger::*;

const RUNNERS: [&str; 3] = ["A", "B", "C"];

// Strategies for generating test data
fn stake_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..50_000i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 to 500
}

fn odds_strategy() -> impl Strategy<Value = Decimal> {
    (101i64..=1_000i64).prop_map(|x| Decimal::new(x, 2)) // 1.01 to 10.00
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Back), Just(Side::Lay)]
}

fn family_strategy() -> impl Strategy<Value = MarketFamily> {
    prop_oneof![
        Just(MarketFamily::MatchOdds),
        Just(MarketFamily::Bookmaker),
        Just(MarketFamily::Fancy),
    ]
}

fn legs_strategy(family: MarketFamily) -> impl Strategy<Value = Vec<ExposureLeg>> {
    prop::collection::vec(
        (0usize..RUNNERS.len(), side_strategy(), stake_strategy(), odds_strategy()),
        0..8,
    )
    .prop_map(move |raw| {
        raw.into_iter()
            .map(|(runner, side, stake, odds)| leg(family, RUNNERS[runner], side, stake, odds))
            .collect()
    })
}

fn leg(family: MarketFamily, selection: &str, side: Side, stake: Decimal, odds: Decimal) -> ExposureLeg {
    let profit = stake * (odds - Decimal::ONE);
    let (win, loss) = match side {
        Side::Back => (profit, stake),
        Side::Lay => (stake, profit),
    };
    ExposureLeg {
        family,
        selection_id: SelectionId::new(selection),
        side,
        line: (family == MarketFamily::Fancy).then_some(dec!(40)),
        win,
        loss,
    }
}

fn runners() -> Vec<SelectionId> {
    RUNNERS.iter().map(|r| SelectionId::new(*r)).collect()
}

fn total_loss(legs: &[ExposureLeg]) -> Decimal {
    legs.iter().map(|l| l.loss).sum()
}

proptest! {
    /// Exposure is a loss figure: never negative, never more than every leg losing
    #[test]
    fn exposure_bounded_by_total_loss(
        (family, legs) in family_strategy().prop_flat_map(|f| (Just(f), legs_strategy(f))),
    ) {
        let value = exposure(family, &legs, &runners());
        prop_assert!(value >= Decimal::ZERO);
        prop_assert!(value <= total_loss(&legs), "{} > {}", value, total_loss(&legs));
    }

    /// Fancy lines never net: exposure is the plain sum of liabilities
    #[test]
    fn fancy_exposure_is_additive(legs in legs_strategy(MarketFamily::Fancy)) {
        prop_assert_eq!(exposure(MarketFamily::Fancy, &legs, &[]), total_loss(&legs));
        prop_assert_eq!(fast_estimate(MarketFamily::Fancy, &legs), total_loss(&legs));
    }

    /// Deltas taken against each prefix add up to the exposure of the whole book
    #[test]
    fn prefix_deltas_telescope(
        (family, legs) in family_strategy().prop_flat_map(|f| (Just(f), legs_strategy(f))),
    ) {
        let runners = runners();
        let mut sum = Decimal::ZERO;
        for i in 0..legs.len() {
            sum += exposure_delta(family, &legs[..i], &legs[i], &runners);
        }
        prop_assert_eq!(sum, exposure(family, &legs, &runners));
    }

    /// Netting can only reduce what a new leg needs
    #[test]
    fn required_lock_never_exceeds_liability(
        (family, legs) in family_strategy().prop_flat_map(|f| (Just(f), legs_strategy(f))),
        side in side_strategy(),
        stake in stake_strategy(),
        odds in odds_strategy(),
    ) {
        let candidate = leg(family, "A", side, stake, odds);
        let required = required_lock(&legs, &candidate);
        prop_assert!(required >= Decimal::ZERO);
        prop_assert!(required <= candidate.loss);
    }

    /// A back and an equal lay on one selection cancel out exactly
    #[test]
    fn matched_hedge_has_no_exposure(stake in stake_strategy(), odds in odds_strategy()) {
        let back = leg(MarketFamily::MatchOdds, "A", Side::Back, stake, odds);
        let lay = leg(MarketFamily::MatchOdds, "A", Side::Lay, stake, odds);
        let runners = runners();
        let book = vec![back.clone(), lay.clone()];
        prop_assert_eq!(exposure(MarketFamily::MatchOdds, &book, &runners), Decimal::ZERO);
        prop_assert_eq!(
            exposure_delta(MarketFamily::MatchOdds, &[back.clone()], &lay, &runners),
            -exposure(MarketFamily::MatchOdds, &[back], &runners)
        );
    }

    /// Commission entries always add up to the negated client result
    #[test]
    fn distribution_zero_sum(
        net in (-1_000_000i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        agent_pct in 0u32..=100u32,
        admin_cut in 0u32..=100u32,
        root_cut in 0u32..=100u32,
    ) {
        // shares must not grow going up the tree
        let agent_share = Decimal::from(agent_pct);
        let admin_share = Decimal::from(agent_pct * admin_cut / 100);
        let root_share = Decimal::from(agent_pct * admin_cut / 100 * root_cut / 100);

        let mut accounts = BTreeMap::new();
        for (id, role, parent, pct) in [
            (1, Role::SuperAdmin, None, root_share),
            (2, Role::Admin, Some(1), admin_share),
            (3, Role::Agent, Some(2), agent_share),
            (4, Role::Client, Some(3), Decimal::ZERO),
        ] {
            accounts.insert(UserId(id), Account {
                id: UserId(id),
                role,
                parent: parent.map(UserId),
                commission_pct: pct,
                created_at: Timestamp::from_millis(0),
            });
        }

        let chain = ancestors(&accounts, UserId(4), 8).unwrap();
        let plan = plan_distribution(&accounts[&UserId(4)], &chain, net, 2).unwrap();
        let total: Decimal = plan.iter().map(|s| s.amount).sum();
        prop_assert_eq!(total, -net);
        let pct: Decimal = plan.iter().map(|s| s.percentage).sum();
        if !net.is_zero() {
            prop_assert_eq!(pct, dec!(100));
        }
    }
}

// Edge case tests

#[cfg(test)]
mod edge_cases {
    use super::*;

    #[test]
    fn empty_book_has_no_exposure() {
        for family in [MarketFamily::MatchOdds, MarketFamily::Bookmaker, MarketFamily::Fancy] {
            assert_eq!(exposure(family, &[], &runners()), Decimal::ZERO);
            assert_eq!(fast_estimate(family, &[]), Decimal::ZERO);
        }
    }

    #[test]
    fn unknown_runners_still_count_back_downside() {
        let back = leg(MarketFamily::MatchOdds, "A", Side::Back, dec!(100), dec!(2.0));
        assert_eq!(exposure(MarketFamily::MatchOdds, &[back], &[]), dec!(100));
    }

    #[test]
    fn backing_every_runner_caps_loss_at_worst_outcome() {
        // A: 200 - 100 - 50, B: -100 + 100 - 50, C: -100 - 100 + 50
        let legs = vec![
            leg(MarketFamily::MatchOdds, "A", Side::Back, dec!(100), dec!(3.0)),
            leg(MarketFamily::MatchOdds, "B", Side::Back, dec!(100), dec!(2.0)),
            leg(MarketFamily::MatchOdds, "C", Side::Back, dec!(50), dec!(2.0)),
        ];
        assert_eq!(exposure(MarketFamily::MatchOdds, &legs, &runners()), dec!(150));
    }
}
