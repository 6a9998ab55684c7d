// 5.0 hierarchy.rs: the account tree and commission-weighted PnL distribution.
// super-admin -> admin -> agent -> client. only clients bet.
// distribution is planned here as a pure function; the engine writes the entries.

use crate::market::MarketFamily;
use crate::types::{EventId, Timestamp, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const FULL_SHARE: Decimal = dec!(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Agent,
    Client,
}

impl Role {
    pub fn rank(&self) -> u8 {
        match self {
            Role::SuperAdmin => 4,
            Role::Admin => 3,
            Role::Agent => 2,
            Role::Client => 1,
        }
    }

    pub fn can_parent(&self, child: Role) -> bool {
        self.rank() > child.rank()
    }

    pub fn can_bet(&self) -> bool {
        matches!(self, Role::Client)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub role: Role,
    pub parent: Option<UserId>,
    /// What this account keeps from its direct child's downline, in percent.
    pub commission_pct: Decimal,
    pub created_at: Timestamp,
}

impl Account {
    /// Share of a downline result this account keeps. Clients keep all of their own.
    pub fn kept_share(&self) -> Decimal {
        match self.role {
            Role::Client => FULL_SHARE,
            _ => self.commission_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HierarchyError {
    #[error("{0:?} accounts need a parent")]
    MissingParent(Role),

    #[error("Super admin accounts cannot have a parent")]
    UnexpectedParent,

    #[error("Parent {0} not found")]
    ParentNotFound(UserId),

    #[error("A {parent:?} cannot parent a {child:?}")]
    RankOrder { parent: Role, child: Role },

    #[error("Commission percentage {0} outside [0, 100]")]
    PercentageOutOfRange(Decimal),

    #[error("Parent keeps {parent_share}% but child keeps only {child_share}%")]
    ShareIncreases {
        parent_share: Decimal,
        child_share: Decimal,
    },

    #[error("Account {0} has no ancestors to distribute to")]
    NoAncestors(UserId),

    #[error("Cycle detected at account {0}")]
    Cycle(UserId),

    #[error("Parent chain deeper than {0}")]
    TooDeep(usize),
}

/// Checks a new account against its would-be parent before it is inserted.
pub fn validate_new_account(
    role: Role,
    parent: Option<&Account>,
    commission_pct: Decimal,
) -> Result<(), HierarchyError> {
    if commission_pct < Decimal::ZERO || commission_pct > FULL_SHARE {
        return Err(HierarchyError::PercentageOutOfRange(commission_pct));
    }
    match (role, parent) {
        (Role::SuperAdmin, Some(_)) => Err(HierarchyError::UnexpectedParent),
        (Role::SuperAdmin, None) => Ok(()),
        (_, None) => Err(HierarchyError::MissingParent(role)),
        (_, Some(parent)) => {
            if !parent.role.can_parent(role) {
                return Err(HierarchyError::RankOrder {
                    parent: parent.role,
                    child: role,
                });
            }
            let child_share = if role == Role::Client {
                FULL_SHARE
            } else {
                commission_pct
            };
            if parent.kept_share() > child_share {
                return Err(HierarchyError::ShareIncreases {
                    parent_share: parent.kept_share(),
                    child_share,
                });
            }
            Ok(())
        }
    }
}

/// Ancestors of `user`, nearest first. Guards against cycles and runaway depth.
pub fn ancestors<'a>(
    accounts: &'a BTreeMap<UserId, Account>,
    user: UserId,
    max_depth: usize,
) -> Result<Vec<&'a Account>, HierarchyError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([user]);
    let mut cursor = accounts.get(&user).and_then(|a| a.parent);

    while let Some(parent_id) = cursor {
        if !seen.insert(parent_id) {
            return Err(HierarchyError::Cycle(parent_id));
        }
        if chain.len() >= max_depth {
            return Err(HierarchyError::TooDeep(max_depth));
        }
        let parent = accounts
            .get(&parent_id)
            .ok_or(HierarchyError::ParentNotFound(parent_id))?;
        chain.push(parent);
        cursor = parent.parent;
    }
    Ok(chain)
}

/// One row of the commission ledger. Never touches a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyPnlEntry {
    pub from_user: UserId,
    pub to_user: UserId,
    pub event_id: EventId,
    pub family: MarketFamily,
    pub amount: Decimal,
    pub percentage: Decimal,
    pub created_at: Timestamp,
}

/// Uniqueness key of an entry: (from, to, event, family).
pub type EntryKey = (UserId, UserId, EventId, MarketFamily);

impl HierarchyPnlEntry {
    pub fn key(&self) -> EntryKey {
        (self.from_user, self.to_user, self.event_id.clone(), self.family)
    }
}

/// The regeneration unit for both summaries and hierarchy entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistributionKey {
    pub user_id: UserId,
    pub event_id: EventId,
    pub family: MarketFamily,
}

/// Aggregate settled result of one client in one (event, family).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlSummary {
    pub user_id: UserId,
    pub event_id: EventId,
    pub family: MarketFamily,
    pub net_pnl: Decimal,
    pub settled_wagers: usize,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedShare {
    pub to_user: UserId,
    pub amount: Decimal,
    pub percentage: Decimal,
}

/// Splits `-net_pnl` up the chain.
///
/// Each ancestor is credited `-net * (child_share - own_share) / 100`, rounded
/// to `scale`. The top-most ancestor takes whatever remains so the shares add
/// up to exactly `-net_pnl`. A zero result plans nothing.
pub fn plan_distribution(
    client: &Account,
    chain: &[&Account],
    net_pnl: Decimal,
    scale: u32,
) -> Result<Vec<PlannedShare>, HierarchyError> {
    if net_pnl.is_zero() {
        return Ok(Vec::new());
    }
    let Some((top, rest)) = chain.split_last() else {
        return Err(HierarchyError::NoAncestors(client.id));
    };

    let target = -net_pnl;
    let mut child_share = client.kept_share();
    let mut assigned = Decimal::ZERO;
    let mut shares = Vec::with_capacity(chain.len());

    for ancestor in rest {
        let own_share = ancestor.kept_share();
        if own_share > child_share {
            return Err(HierarchyError::ShareIncreases {
                parent_share: own_share,
                child_share,
            });
        }
        let percentage = child_share - own_share;
        let amount = (target * percentage / FULL_SHARE).round_dp(scale);
        assigned += amount;
        shares.push(PlannedShare {
            to_user: ancestor.id,
            amount,
            percentage,
        });
        child_share = own_share;
    }

    if top.kept_share() > child_share {
        return Err(HierarchyError::ShareIncreases {
            parent_share: top.kept_share(),
            child_share,
        });
    }
    shares.push(PlannedShare {
        to_user: top.id,
        amount: target - assigned,
        percentage: child_share,
    });
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: u64, role: Role, parent: Option<u64>, pct: Decimal) -> Account {
        Account {
            id: UserId(id),
            role,
            parent: parent.map(UserId),
            commission_pct: pct,
            created_at: Timestamp::from_millis(0),
        }
    }

    fn tree() -> BTreeMap<UserId, Account> {
        [
            account(1, Role::SuperAdmin, None, dec!(0)),
            account(2, Role::Admin, Some(1), dec!(40)),
            account(3, Role::Agent, Some(2), dec!(75)),
            account(4, Role::Client, Some(3), dec!(0)),
        ]
        .into_iter()
        .map(|a| (a.id, a))
        .collect()
    }

    #[test]
    fn roles_must_nest_by_rank() {
        let agent = account(3, Role::Agent, Some(2), dec!(75));
        assert!(validate_new_account(Role::Client, Some(&agent), dec!(0)).is_ok());
        assert_eq!(
            validate_new_account(Role::Admin, Some(&agent), dec!(80)),
            Err(HierarchyError::RankOrder {
                parent: Role::Agent,
                child: Role::Admin
            })
        );
        assert_eq!(
            validate_new_account(Role::Client, None, dec!(0)),
            Err(HierarchyError::MissingParent(Role::Client))
        );
        assert_eq!(
            validate_new_account(Role::SuperAdmin, Some(&agent), dec!(0)),
            Err(HierarchyError::UnexpectedParent)
        );
    }

    #[test]
    fn shares_cannot_grow_going_up() {
        let admin = account(2, Role::Admin, Some(1), dec!(60));
        assert!(matches!(
            validate_new_account(Role::Agent, Some(&admin), dec!(50)),
            Err(HierarchyError::ShareIncreases { .. })
        ));
        assert!(validate_new_account(Role::Agent, Some(&admin), dec!(60)).is_ok());
        assert!(matches!(
            validate_new_account(Role::Agent, Some(&admin), dec!(101)),
            Err(HierarchyError::PercentageOutOfRange(_))
        ));
    }

    #[test]
    fn ancestors_nearest_first() {
        let accounts = tree();
        let chain = ancestors(&accounts, UserId(4), 8).unwrap();
        let ids: Vec<u64> = chain.iter().map(|a| a.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn ancestors_detects_cycles_and_depth() {
        let mut accounts = tree();
        accounts.get_mut(&UserId(1)).unwrap().parent = Some(UserId(3));
        assert_eq!(
            ancestors(&accounts, UserId(4), 8).unwrap_err(),
            HierarchyError::Cycle(UserId(3))
        );
        assert_eq!(
            ancestors(&tree(), UserId(4), 2).unwrap_err(),
            HierarchyError::TooDeep(2)
        );
    }

    #[test]
    fn client_loss_flows_up_by_share_difference() {
        let accounts = tree();
        let chain = ancestors(&accounts, UserId(4), 8).unwrap();
        let plan = plan_distribution(&accounts[&UserId(4)], &chain, dec!(-1000), 2).unwrap();

        // agent: 100 - 75 = 25%, admin: 75 - 40 = 35%, super admin: remaining 40%
        let amounts: Vec<(u64, Decimal, Decimal)> =
            plan.iter().map(|s| (s.to_user.0, s.amount, s.percentage)).collect();
        assert_eq!(
            amounts,
            vec![
                (3, dec!(250), dec!(25)),
                (2, dec!(350), dec!(35)),
                (1, dec!(400), dec!(40)),
            ]
        );
    }

    #[test]
    fn rounding_residual_lands_on_top() {
        let accounts = tree();
        let chain = ancestors(&accounts, UserId(4), 8).unwrap();
        let plan = plan_distribution(&accounts[&UserId(4)], &chain, dec!(100.01), 2).unwrap();
        let total: Decimal = plan.iter().map(|s| s.amount).sum();
        assert_eq!(total, dec!(-100.01));
    }

    #[test]
    fn zero_result_plans_nothing() {
        let accounts = tree();
        let chain = ancestors(&accounts, UserId(4), 8).unwrap();
        assert!(plan_distribution(&accounts[&UserId(4)], &chain, dec!(0), 2)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn misconfigured_chain_is_refused() {
        let mut accounts = tree();
        accounts.get_mut(&UserId(2)).unwrap().commission_pct = dec!(90);
        let chain = ancestors(&accounts, UserId(4), 8).unwrap();
        assert!(matches!(
            plan_distribution(&accounts[&UserId(4)], &chain, dec!(50), 2),
            Err(HierarchyError::ShareIncreases { .. })
        ));
    }
}
