//! Wallet ledger: the account of record for spendable credit and locked risk.
//!
//! `balance` is what the user can still stake or withdraw. `liability` is the
//! sum of what their open wagers currently have locked. `locked_exposure` is the
//! part of that liability that is still a fast-path estimate waiting for
//! reconciliation. Settlement PnL moves `balance` only.

use crate::types::{Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Decimal,
    pub liability: Decimal,
    /// Signed net of fast-path locks not yet replaced by an exact figure.
    pub locked_exposure: Decimal,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub realized_pnl: Decimal,
    pub created_at: Timestamp,
}

impl Wallet {
    pub fn new(user_id: UserId, timestamp: Timestamp) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            liability: Decimal::ZERO,
            locked_exposure: Decimal::ZERO,
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            created_at: timestamp,
        }
    }

    pub fn deposit(&mut self, amount: Decimal) -> Result<(), WalletError> {
        if amount <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount(amount));
        }
        self.balance += amount;
        self.total_deposited += amount;
        Ok(())
    }

    /// Locked liability is never withdrawable.
    pub fn withdraw(&mut self, amount: Decimal) -> Result<(), WalletError> {
        if amount <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount(amount));
        }
        if amount > self.balance {
            return Err(WalletError::InsufficientFunds {
                required: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        self.total_withdrawn += amount;
        Ok(())
    }

    /// Move `amount` from balance into liability.
    pub fn lock(&mut self, amount: Decimal) -> Result<(), WalletError> {
        if amount < Decimal::ZERO {
            return Err(WalletError::InvalidAmount(amount));
        }
        if amount > self.balance {
            return Err(WalletError::InsufficientFunds {
                required: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        self.liability += amount;
        Ok(())
    }

    /// Move up to `amount` from liability back to balance. Returns what was actually released.
    pub fn release(&mut self, amount: Decimal) -> Decimal {
        let released = amount.max(Decimal::ZERO).min(self.liability);
        self.liability -= released;
        self.balance += released;
        released
    }

    /// Signed lock: positive locks, negative releases.
    pub fn adjust_lock(&mut self, delta: Decimal) -> Result<Decimal, WalletError> {
        if delta >= Decimal::ZERO {
            self.lock(delta)?;
            Ok(delta)
        } else {
            Ok(-self.release(-delta))
        }
    }

    pub fn note_provisional(&mut self, amount: Decimal) {
        self.locked_exposure += amount;
    }

    pub fn clear_provisional(&mut self, amount: Decimal) {
        self.locked_exposure -= amount;
    }

    /// Book settled profit or loss. Liability is not touched.
    pub fn apply_pnl(&mut self, amount: Decimal) -> Result<(), WalletError> {
        let next = self.balance + amount;
        if next < Decimal::ZERO {
            return Err(WalletError::NegativeBalance {
                balance: self.balance,
                pnl: amount,
            });
        }
        self.balance = next;
        self.realized_pnl += amount;
        Ok(())
    }

    pub fn total_credit(&self) -> Decimal {
        self.balance + self.liability
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Applying {pnl} to balance {balance} would go negative")]
    NegativeBalance { balance: Decimal, pnl: Decimal },

    #[error("Invalid amount {0}")]
    InvalidAmount(Decimal),
}
