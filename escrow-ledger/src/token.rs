//! Fungible asset ledger
//!
//! Balances and spend allowances for one asset. `approve` overwrites the
//! previous allowance; `transfer_from` consumes it.

use crate::events::{LedgerEvent, LogEntry};
use crate::types::{Address, Amount};
use crate::{LedgerError, LedgerResult};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct TokenLedger {
    address: Address,
    symbol: String,
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<(Address, Address), Amount>,
    total_supply: Amount,
}

impl TokenLedger {
    pub fn new(address: Address, symbol: impl Into<String>) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            total_supply: 0,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, owner: &Address) -> Amount {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    /// Credit newly issued units to `to`
    pub fn mint(&mut self, to: Address, amount: Amount) -> LedgerResult<()> {
        if to.is_zero() {
            return Err(LedgerError::precondition("Cannot mint to the zero address"));
        }
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| LedgerError::precondition("Total supply overflow"))?;
        *self.balances.entry(to).or_insert(0) += amount;
        self.total_supply = supply;
        Ok(())
    }

    pub fn approve(
        &mut self,
        owner: Address,
        spender: Address,
        amount: Amount,
        logs: &mut Vec<LogEntry>,
    ) -> LedgerResult<()> {
        if spender.is_zero() {
            return Err(LedgerError::precondition("Cannot approve the zero address"));
        }
        self.allowances.insert((owner, spender), amount);
        logs.push(LogEntry::new(
            self.address,
            LedgerEvent::Approval {
                owner,
                spender,
                amount,
            },
        ));
        Ok(())
    }

    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
        logs: &mut Vec<LogEntry>,
    ) -> LedgerResult<()> {
        if to.is_zero() {
            return Err(LedgerError::precondition("Cannot transfer to the zero address"));
        }
        let balance = self.balance_of(&from);
        if balance < amount {
            return Err(LedgerError::precondition(format!(
                "Insufficient balance: {} available, {} required",
                balance, amount
            )));
        }
        self.balances.insert(from, balance - amount);
        *self.balances.entry(to).or_insert(0) += amount;
        logs.push(LogEntry::new(
            self.address,
            LedgerEvent::Transfer { from, to, amount },
        ));
        Ok(())
    }

    /// Move `amount` from `owner` to `to` on behalf of `spender`
    pub fn transfer_from(
        &mut self,
        spender: Address,
        owner: Address,
        to: Address,
        amount: Amount,
        logs: &mut Vec<LogEntry>,
    ) -> LedgerResult<()> {
        let allowed = self.allowance(&owner, &spender);
        if allowed < amount {
            return Err(LedgerError::precondition(format!(
                "Insufficient allowance: {} approved, {} required",
                allowed, amount
            )));
        }
        self.transfer(owner, to, amount, logs)?;
        self.allowances.insert((owner, spender), allowed - amount);
        Ok(())
    }
}
