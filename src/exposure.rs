// 3.0 exposure.rs: worst-case loss for one user's open wagers in one market.
// every function here is pure. no storage, no clocks, no logging.
//
//   3.1 match odds: enumerate every outcome as the winner, take the worst total
//   3.2 bookmaker: |BACK stakes - LAY liability| per selection
//   3.3 fancy: liability is the stake (or supplied raw loss) on either side
//   3.4 delta protocol: price a candidate as new exposure minus old exposure
//   3.5 fast estimate: opposite-side netting used at acceptance time

use crate::market::MarketFamily;
use crate::types::{SelectionId, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The slice of a wager the calculators need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureLeg {
    pub family: MarketFamily,
    pub selection_id: SelectionId,
    pub side: Side,
    pub line: Option<Decimal>,
    pub win: Decimal,
    pub loss: Decimal,
}

impl ExposureLeg {
    // BACK wins when its selection wins, LAY wins otherwise
    fn pnl_if(&self, selection_wins: bool) -> Decimal {
        let leg_wins = match self.side {
            Side::Back => selection_wins,
            Side::Lay => !selection_wins,
        };
        if leg_wins {
            self.win
        } else {
            -self.loss
        }
    }
}

fn of_family(legs: &[ExposureLeg], family: MarketFamily) -> impl Iterator<Item = &ExposureLeg> {
    legs.iter().filter(move |leg| leg.family == family)
}

/// 3.1: fixed-odds multi-outcome exposure.
///
/// Per selection we keep `(if_wins, if_loses)`. With `W` as the winner the
/// book totals `if_wins[W] + sum(if_loses[s] for s != W)`. Every known runner
/// is tried; when the runner list is unknown, or a single selection makes up
/// the whole book, an unlisted runner winning is tried too so BACK downside is
/// never missed.
pub fn match_odds_exposure(legs: &[ExposureLeg], runners: &[SelectionId]) -> Decimal {
    let mut book: BTreeMap<&SelectionId, (Decimal, Decimal)> = BTreeMap::new();
    for leg in of_family(legs, MarketFamily::MatchOdds) {
        let entry = book.entry(&leg.selection_id).or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += leg.pnl_if(true);
        entry.1 += leg.pnl_if(false);
    }
    if book.is_empty() {
        return Decimal::ZERO;
    }

    // total when none of the bet-on selections wins
    let all_lose: Decimal = book.values().map(|(_, lose)| *lose).sum();

    let mut worst = Decimal::ZERO;
    for (win, lose) in book.values() {
        let total = all_lose - *lose + *win;
        worst = worst.min(total);
    }

    let every_runner_bet = runners.len() >= 2 && runners.iter().all(|r| book.contains_key(r));
    if !every_runner_bet {
        worst = worst.min(all_lose);
    }

    -worst
}

/// 3.2: bookmaker exposure, `|sum BACK stake - sum LAY liability|` per selection.
pub fn bookmaker_exposure(legs: &[ExposureLeg]) -> Decimal {
    let mut net: BTreeMap<&SelectionId, Decimal> = BTreeMap::new();
    for leg in of_family(legs, MarketFamily::Bookmaker) {
        let entry = net.entry(&leg.selection_id).or_insert(Decimal::ZERO);
        match leg.side {
            Side::Back => *entry += leg.loss,
            Side::Lay => *entry -= leg.loss,
        }
    }
    net.values().map(|v| v.abs()).sum()
}

/// 3.3: fancy exposure. each leg risks its own liability; YES and NO never offset.
pub fn fancy_exposure(legs: &[ExposureLeg]) -> Decimal {
    of_family(legs, MarketFamily::Fancy).map(|leg| leg.loss).sum()
}

/// Exact worst-case exposure for one family. legs from other families are ignored.
pub fn exposure(family: MarketFamily, legs: &[ExposureLeg], runners: &[SelectionId]) -> Decimal {
    match family {
        MarketFamily::MatchOdds => match_odds_exposure(legs, runners),
        MarketFamily::Bookmaker => bookmaker_exposure(legs),
        MarketFamily::Fancy => fancy_exposure(legs),
    }
}

/// 3.4: `exposure(existing + candidate) - exposure(existing)`.
///
/// Negative when the candidate hedges the existing book and frees funds.
pub fn exposure_delta(
    family: MarketFamily,
    existing: &[ExposureLeg],
    candidate: &ExposureLeg,
    runners: &[SelectionId],
) -> Decimal {
    let before = exposure(family, existing, runners);
    let mut with_candidate = existing.to_vec();
    with_candidate.push(candidate.clone());
    let after = exposure(family, &with_candidate, runners);
    after - before
}

/// 3.5: loss already on the other side of the candidate's selection.
pub fn opposing_loss(existing: &[ExposureLeg], candidate: &ExposureLeg) -> Decimal {
    if !candidate.family.nets_opposite_sides() {
        return Decimal::ZERO;
    }
    of_family(existing, candidate.family)
        .filter(|leg| leg.selection_id == candidate.selection_id && leg.side != candidate.side)
        .map(|leg| leg.loss)
        .sum()
}

/// Funds the candidate needs once it is netted against the opposite side.
pub fn required_lock(existing: &[ExposureLeg], candidate: &ExposureLeg) -> Decimal {
    (candidate.loss - opposing_loss(existing, candidate)).max(Decimal::ZERO)
}

/// Cheap acceptance-time estimate of a market's total lock.
///
/// Hedging families sum the dominant side's net loss per selection; fancy
/// sums liabilities. Linear in the number of legs.
pub fn fast_estimate(family: MarketFamily, legs: &[ExposureLeg]) -> Decimal {
    if !family.nets_opposite_sides() {
        return fancy_exposure(legs);
    }
    let mut sides: BTreeMap<&SelectionId, (Decimal, Decimal)> = BTreeMap::new();
    for leg in of_family(legs, family) {
        let entry = sides.entry(&leg.selection_id).or_insert((Decimal::ZERO, Decimal::ZERO));
        match leg.side {
            Side::Back => entry.0 += leg.loss,
            Side::Lay => entry.1 += leg.loss,
        }
    }
    sides.values().map(|(back, lay)| (*back - *lay).abs()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(family: MarketFamily, sel: &str, side: Side, stake: Decimal, odds: Decimal) -> ExposureLeg {
        let profit = stake * (odds - Decimal::ONE);
        let (win, loss) = match side {
            Side::Back => (profit, stake),
            Side::Lay => (stake, profit),
        };
        ExposureLeg {
            family,
            selection_id: SelectionId::new(sel),
            side,
            line: None,
            win,
            loss,
        }
    }

    fn mo(sel: &str, side: Side, stake: Decimal, odds: Decimal) -> ExposureLeg {
        leg(MarketFamily::MatchOdds, sel, side, stake, odds)
    }

    fn runners(names: &[&str]) -> Vec<SelectionId> {
        names.iter().map(|n| SelectionId::new(*n)).collect()
    }

    #[test]
    fn three_outcome_worst_case_is_unbet_runner() {
        let legs = vec![
            mo("A", Side::Back, dec!(100), dec!(2.0)),
            mo("B", Side::Back, dec!(50), dec!(3.0)),
        ];
        assert_eq!(match_odds_exposure(&legs, &runners(&["A", "B", "C"])), dec!(150));
        // unknown runner list reaches the same answer through the unlisted outcome
        assert_eq!(match_odds_exposure(&legs, &[]), dec!(150));
    }

    #[test]
    fn single_back_still_simulates_losing() {
        let legs = vec![mo("A", Side::Back, dec!(100), dec!(4.0))];
        assert_eq!(match_odds_exposure(&legs, &[]), dec!(100));
    }

    #[test]
    fn single_lay_loses_when_selection_wins() {
        let legs = vec![mo("A", Side::Lay, dec!(100), dec!(3.0))];
        assert_eq!(match_odds_exposure(&legs, &runners(&["A", "B"])), dec!(200));
    }

    #[test]
    fn fully_covered_two_runner_book_has_no_unlisted_outcome() {
        // A wins: +100 - 100 = 0, B wins: -100 + 100 = 0
        let legs = vec![
            mo("A", Side::Back, dec!(100), dec!(2.0)),
            mo("B", Side::Back, dec!(100), dec!(2.0)),
        ];
        assert_eq!(match_odds_exposure(&legs, &runners(&["A", "B"])), dec!(0));
        assert_eq!(match_odds_exposure(&legs, &[]), dec!(200));
    }

    #[test]
    fn hedge_brings_match_odds_exposure_to_zero() {
        let back = mo("A", Side::Back, dec!(1000), dec!(2.0));
        let lay = mo("A", Side::Lay, dec!(1000), dec!(2.0));

        let first = exposure_delta(MarketFamily::MatchOdds, &[], &back, &[]);
        assert_eq!(first, dec!(1000));

        let second = exposure_delta(MarketFamily::MatchOdds, &[back.clone()], &lay, &[]);
        assert_eq!(second, dec!(-1000));
        assert_eq!(match_odds_exposure(&[back, lay], &[]), dec!(0));
    }

    #[test]
    fn bookmaker_nets_back_stake_against_lay_liability() {
        let legs = vec![
            leg(MarketFamily::Bookmaker, "A", Side::Back, dec!(200), dec!(1.5)),
            leg(MarketFamily::Bookmaker, "A", Side::Lay, dec!(100), dec!(2.0)),
        ];
        assert_eq!(bookmaker_exposure(&legs), dec!(100));
    }

    #[test]
    fn bookmaker_does_not_net_across_selections() {
        let legs = vec![
            leg(MarketFamily::Bookmaker, "A", Side::Back, dec!(100), dec!(2.0)),
            leg(MarketFamily::Bookmaker, "B", Side::Lay, dec!(100), dec!(2.0)),
        ];
        assert_eq!(bookmaker_exposure(&legs), dec!(200));
    }

    #[test]
    fn fancy_lay_liability_is_stake() {
        let mut lay = leg(MarketFamily::Fancy, "L", Side::Lay, dec!(300), dec!(5.0));
        lay.loss = dec!(300);
        assert_eq!(fancy_exposure(&[lay]), dec!(300));
    }

    #[test]
    fn families_never_mix_inside_a_calculator() {
        let legs = vec![
            mo("A", Side::Back, dec!(100), dec!(2.0)),
            leg(MarketFamily::Bookmaker, "A", Side::Back, dec!(500), dec!(2.0)),
            leg(MarketFamily::Fancy, "A", Side::Back, dec!(70), dec!(2.0)),
        ];
        assert_eq!(exposure(MarketFamily::MatchOdds, &legs, &[]), dec!(100));
        assert_eq!(exposure(MarketFamily::Bookmaker, &legs, &[]), dec!(500));
        assert_eq!(exposure(MarketFamily::Fancy, &legs, &[]), dec!(70));
    }

    #[test]
    fn required_lock_nets_opposite_side_only() {
        let existing = vec![mo("A", Side::Back, dec!(1000), dec!(2.0))];
        let lay_same = mo("A", Side::Lay, dec!(1000), dec!(2.0));
        let lay_other = mo("B", Side::Lay, dec!(1000), dec!(2.0));
        assert_eq!(required_lock(&existing, &lay_same), dec!(0));
        assert_eq!(required_lock(&existing, &lay_other), dec!(1000));
    }

    #[test]
    fn fancy_never_nets_at_acceptance() {
        let mut back = leg(MarketFamily::Fancy, "L", Side::Back, dec!(100), dec!(2.0));
        back.loss = dec!(100);
        let mut lay = leg(MarketFamily::Fancy, "L", Side::Lay, dec!(100), dec!(2.0));
        lay.loss = dec!(100);
        assert_eq!(required_lock(&[back.clone()], &lay), dec!(100));
        assert_eq!(fast_estimate(MarketFamily::Fancy, &[back, lay]), dec!(200));
    }

    #[test]
    fn fast_estimate_nets_per_selection() {
        let legs = vec![
            mo("A", Side::Back, dec!(1000), dec!(2.0)),
            mo("A", Side::Lay, dec!(400), dec!(2.0)),
            mo("B", Side::Lay, dec!(100), dec!(3.0)),
        ];
        // A: |1000 - 400| = 600, B: |0 - 200| = 200
        assert_eq!(fast_estimate(MarketFamily::MatchOdds, &legs), dec!(800));
    }

    #[test]
    fn empty_book_has_no_exposure() {
        assert_eq!(exposure(MarketFamily::MatchOdds, &[], &[]), dec!(0));
        assert_eq!(exposure(MarketFamily::Bookmaker, &[], &[]), dec!(0));
        assert_eq!(fast_estimate(MarketFamily::Fancy, &[]), dec!(0));
    }
}
