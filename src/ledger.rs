//! Ledger (C11): per-account balances as arbitrary-precision atomic-unit
//! integers, serialized as decimal strings at every boundary.

use crate::error::{ProofError, StoreError};
use num_bigint::BigUint;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub balance: String,
    pub nonce: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Account {
    fn fresh(address: &str, now_ms: i64) -> Self {
        Self {
            address: address.to_lowercase(),
            balance: "0".to_string(),
            nonce: 0,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

fn parse_balance(s: &str) -> Result<BigUint, StoreError> {
    BigUint::from_str(s).map_err(|_| StoreError::InvalidBalance(s.to_string()))
}

/// Computes `base · 2^{-(level-1)}` in atomic units, truncating toward
/// zero like integer division — rewards only ever shrink by halving.
pub fn reward_for_level(base_reward_atomic: &str, level: u8) -> Result<BigUint, StoreError> {
    let base = parse_balance(base_reward_atomic)?;
    let shift = (level.saturating_sub(1)) as u32;
    Ok(base >> shift)
}

pub trait Ledger: Send + Sync {
    fn credit(&self, address: &str, amount: &BigUint, now_ms: i64) -> Result<Account, StoreError>;
    fn debit(&self, address: &str, amount: &BigUint, now_ms: i64) -> Result<Account, ProofError>;
    fn get(&self, address: &str) -> Result<Option<Account>, StoreError>;
}

/// In-memory reference implementation.
pub struct InMemoryLedger {
    accounts: Mutex<HashMap<String, Account>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for InMemoryLedger {
    fn credit(&self, address: &str, amount: &BigUint, now_ms: i64) -> Result<Account, StoreError> {
        let key = address.to_lowercase();
        let mut accounts = self.accounts.lock();
        let account = accounts
            .entry(key.clone())
            .or_insert_with(|| Account::fresh(&key, now_ms));
        let balance = parse_balance(&account.balance)? + amount;
        account.balance = balance.to_string();
        account.updated_at = now_ms;
        Ok(account.clone())
    }

    fn debit(&self, address: &str, amount: &BigUint, now_ms: i64) -> Result<Account, ProofError> {
        let key = address.to_lowercase();
        let mut accounts = self.accounts.lock();
        let account = accounts
            .entry(key.clone())
            .or_insert_with(|| Account::fresh(&key, now_ms));
        let current =
            parse_balance(&account.balance).map_err(|e| ProofError::InternalError(e.to_string()))?;
        if current < *amount {
            return Err(ProofError::InsufficientBalance);
        }
        account.balance = (current - amount).to_string();
        account.updated_at = now_ms;
        Ok(account.clone())
    }

    fn get(&self, address: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.lock().get(&address.to_lowercase()).cloned())
    }
}

/// `rusqlite`-backed ledger. Balances are stored as `TEXT` decimal strings
/// — never as a native integer or float column — so arbitrary precision
/// survives round trips through the database.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                address TEXT PRIMARY KEY,
                balance TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_or_create(conn: &Connection, address: &str, now_ms: i64) -> Result<Account, StoreError> {
        let existing = conn
            .query_row(
                "SELECT address, balance, nonce, created_at, updated_at FROM accounts WHERE address = ?1",
                params![address],
                |row| {
                    Ok(Account {
                        address: row.get(0)?,
                        balance: row.get(1)?,
                        nonce: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        if let Some(account) = existing {
            return Ok(account);
        }
        let fresh = Account::fresh(address, now_ms);
        conn.execute(
            "INSERT INTO accounts (address, balance, nonce, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![fresh.address, fresh.balance, fresh.nonce, fresh.created_at, fresh.updated_at],
        )?;
        Ok(fresh)
    }

    fn save(conn: &Connection, account: &Account) -> Result<(), StoreError> {
        conn.execute(
            "UPDATE accounts SET balance = ?1, nonce = ?2, updated_at = ?3 WHERE address = ?4",
            params![account.balance, account.nonce, account.updated_at, account.address],
        )?;
        Ok(())
    }
}

impl Ledger for SqliteLedger {
    fn credit(&self, address: &str, amount: &BigUint, now_ms: i64) -> Result<Account, StoreError> {
        let conn = self.conn.lock();
        let key = address.to_lowercase();
        let mut account = Self::load_or_create(&conn, &key, now_ms)?;
        let balance = parse_balance(&account.balance)? + amount;
        account.balance = balance.to_string();
        account.updated_at = now_ms;
        Self::save(&conn, &account)?;
        Ok(account)
    }

    fn debit(&self, address: &str, amount: &BigUint, now_ms: i64) -> Result<Account, ProofError> {
        let conn = self.conn.lock();
        let key = address.to_lowercase();
        let mut account = Self::load_or_create(&conn, &key, now_ms)
            .map_err(|e| ProofError::InternalError(e.to_string()))?;
        let current =
            parse_balance(&account.balance).map_err(|e| ProofError::InternalError(e.to_string()))?;
        if current < *amount {
            return Err(ProofError::InsufficientBalance);
        }
        account.balance = (current - amount).to_string();
        account.updated_at = now_ms;
        Self::save(&conn, &account).map_err(|e| ProofError::InternalError(e.to_string()))?;
        Ok(account)
    }

    fn get(&self, address: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT address, balance, nonce, created_at, updated_at FROM accounts WHERE address = ?1",
            params![address.to_lowercase()],
            |row| {
                Ok(Account {
                    address: row.get(0)?,
                    balance: row.get(1)?,
                    nonce: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_is_created_on_first_credit() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.get("0xabc").unwrap().is_none());
        let account = ledger
            .credit("0xabc", &BigUint::from(100u32), 1000)
            .unwrap();
        assert_eq!(account.balance, "100");
    }

    #[test]
    fn debit_fails_on_insufficient_balance() {
        let ledger = InMemoryLedger::new();
        ledger.credit("0xabc", &BigUint::from(50u32), 1000).unwrap();
        let err = ledger.debit("0xabc", &BigUint::from(100u32), 2000).unwrap_err();
        assert!(matches!(err, ProofError::InsufficientBalance));
    }

    #[test]
    fn balance_never_goes_negative() {
        let ledger = InMemoryLedger::new();
        let result = ledger.debit("0xnew", &BigUint::from(1u32), 1000);
        assert!(result.is_err());
    }

    #[test]
    fn reward_halves_by_level() {
        let base = "1000000000000000000";
        let r1 = reward_for_level(base, 1).unwrap();
        let r2 = reward_for_level(base, 2).unwrap();
        let r10 = reward_for_level(base, 10).unwrap();
        assert_eq!(r1.to_string(), base);
        assert_eq!(r2, r1.clone() / 2u32);
        assert_eq!(r10, r1 / 512u32);
    }

    #[test]
    fn sqlite_ledger_round_trips_big_balances() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = SqliteLedger::open(conn).unwrap();
        let huge = BigUint::from_str("123456789012345678901234567890").unwrap();
        ledger.credit("0xabc", &huge, 1000).unwrap();
        let account = ledger.get("0xabc").unwrap().unwrap();
        assert_eq!(account.balance, huge.to_string());
    }
}
