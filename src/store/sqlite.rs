// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite store with connection pooling via r2d2.
//!
//! Schema: one `wallets` table, one `proofs` table. A proof's `secret` is
//! globally unique: it is the mint's double-spend key and the engine's
//! idempotency anchor. Wallet deletion is `RESTRICT`ed while proofs exist;
//! callers must delete proofs first (only done on new-wallet rollback).

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::{StoreError, StoreResult};
use crate::mint::types::Proof;

/// Local proof lifecycle status.
///
/// `Spent` is terminal; `Unspent` and `Pending` are mutually reversible but
/// only when the mint confirms a reservation did not consume the proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofStatus {
    Unspent,
    Pending,
    Spent,
}

impl ProofStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofStatus::Unspent => "UNSPENT",
            ProofStatus::Pending => "PENDING",
            ProofStatus::Spent => "SPENT",
        }
    }
}

impl FromStr for ProofStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNSPENT" => Ok(ProofStatus::Unspent),
            "PENDING" => Ok(ProofStatus::Pending),
            "SPENT" => Ok(ProofStatus::Spent),
            other => Err(StoreError::InvalidData(format!(
                "unknown proof status: {other}"
            ))),
        }
    }
}

/// A wallet row: an isolated balance scope bound to one mint and one unit.
#[derive(Debug, Clone)]
pub struct WalletRecord {
    pub id: i64,
    /// 32 random bytes rendered as hex; the bearer credential.
    pub access_key: String,
    pub name: Option<String>,
    pub mint_url: String,
    pub unit: String,
    pub max_balance: Option<u64>,
    pub max_send: Option<u64>,
    pub max_pay: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Parameters for wallet creation.
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub access_key: String,
    pub name: Option<String>,
    pub mint_url: String,
    pub unit: String,
    pub max_balance: Option<u64>,
    pub max_send: Option<u64>,
    pub max_pay: Option<u64>,
}

/// A persisted ecash note.
#[derive(Debug, Clone)]
pub struct StoredProof {
    pub id: i64,
    pub wallet_id: i64,
    /// The mint's keyset id (not unique).
    pub keyset_id: String,
    pub amount: u64,
    pub secret: String,
    pub c: String,
    /// Stringified DLEQ proof JSON, kept opaque.
    pub dleq: Option<String>,
    /// Witness string (possibly stringified JSON), kept opaque.
    pub witness: Option<String>,
    pub status: ProofStatus,
    pub created_at: DateTime<Utc>,
}

impl StoredProof {
    /// Convert back to the wire representation. `dleq` is parsed as JSON,
    /// `witness` passes through unchanged.
    pub fn to_proof(&self) -> Proof {
        Proof {
            id: self.keyset_id.clone(),
            amount: self.amount,
            secret: self.secret.clone(),
            c: self.c.clone(),
            dleq: self
                .dleq
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            witness: self.witness.clone(),
        }
    }
}

/// SQLite-backed wallet/proof store with connection pooling.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing). Pool size is pinned to one
    /// connection so every caller sees the same database.
    pub fn in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                access_key  TEXT NOT NULL UNIQUE,
                name        TEXT,
                mint_url    TEXT NOT NULL,
                unit        TEXT NOT NULL DEFAULT 'sat',
                max_balance INTEGER,
                max_send    INTEGER,
                max_pay     INTEGER,
                created_at  TEXT NOT NULL,
                updated_at  TEXT
            );

            CREATE TABLE IF NOT EXISTS proofs (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                wallet_id  INTEGER NOT NULL REFERENCES wallets(id) ON DELETE RESTRICT,
                keyset_id  TEXT NOT NULL,
                amount     INTEGER NOT NULL,
                secret     TEXT NOT NULL UNIQUE,
                c          TEXT NOT NULL,
                dleq       TEXT,
                witness    TEXT,
                status     TEXT NOT NULL DEFAULT 'UNSPENT',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_proofs_wallet_status
                ON proofs(wallet_id, status);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn row_to_wallet(row: &rusqlite::Row) -> rusqlite::Result<WalletRecord> {
        Ok(WalletRecord {
            id: row.get("id")?,
            access_key: row.get("access_key")?,
            name: row.get("name")?,
            mint_url: row.get("mint_url")?,
            unit: row.get("unit")?,
            max_balance: row.get::<_, Option<i64>>("max_balance")?.map(|v| v as u64),
            max_send: row.get::<_, Option<i64>>("max_send")?.map(|v| v as u64),
            max_pay: row.get::<_, Option<i64>>("max_pay")?.map(|v| v as u64),
            created_at: parse_ts(row.get::<_, String>("created_at")?),
            updated_at: row.get::<_, Option<String>>("updated_at")?.map(parse_ts),
        })
    }

    fn row_to_proof(row: &rusqlite::Row) -> rusqlite::Result<StoredProof> {
        let status: String = row.get("status")?;
        Ok(StoredProof {
            id: row.get("id")?,
            wallet_id: row.get("wallet_id")?,
            keyset_id: row.get("keyset_id")?,
            amount: row.get::<_, i64>("amount")? as u64,
            secret: row.get("secret")?,
            c: row.get("c")?,
            dleq: row.get("dleq")?,
            witness: row.get("witness")?,
            status: status.parse().unwrap_or(ProofStatus::Unspent),
            created_at: parse_ts(row.get::<_, String>("created_at")?),
        })
    }

    // ── Wallets ──

    /// Insert a new wallet. Fails with `Duplicate` when the access key
    /// collides (the caller regenerates and retries).
    pub fn create_wallet(&self, new: &NewWallet) -> StoreResult<WalletRecord> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO wallets
                (access_key, name, mint_url, unit, max_balance, max_send, max_pay, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                new.access_key,
                new.name,
                new.mint_url,
                new.unit,
                new.max_balance.map(|v| v as i64),
                new.max_send.map(|v| v as i64),
                new.max_pay.map(|v| v as i64),
                now,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate("wallet access key".to_string())
            }
            other => StoreError::Database(other.to_string()),
        })?;

        let id = conn.last_insert_rowid();
        self.get_wallet(id)?
            .ok_or_else(|| StoreError::NotFound(format!("wallet {id}")))
    }

    pub fn get_wallet(&self, id: i64) -> StoreResult<Option<WalletRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM wallets WHERE id = ?1",
            params![id],
            Self::row_to_wallet,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub fn find_wallet_by_access_key(&self, access_key: &str) -> StoreResult<Option<WalletRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM wallets WHERE access_key = ?1",
            params![access_key],
            Self::row_to_wallet,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Delete a wallet row. Used only on new-wallet rollback; fails while
    /// proofs still reference it.
    pub fn delete_wallet(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let affected = conn
            .execute("DELETE FROM wallets WHERE id = ?1", params![id])
            .map_err(|e| StoreError::Database(e.to_string()))?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("wallet {id}")));
        }
        Ok(())
    }

    /// Delete every proof owned by a wallet. Used only on new-wallet rollback.
    pub fn delete_proofs_by_wallet(&self, wallet_id: i64) -> StoreResult<usize> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM proofs WHERE wallet_id = ?1", params![wallet_id])
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // ── Proofs ──

    /// Sum of proof amounts for a wallet in the given status. Empty set
    /// sums to zero.
    pub fn aggregate_amount(&self, wallet_id: i64, status: ProofStatus) -> StoreResult<u64> {
        let conn = self.conn()?;
        let total: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM proofs WHERE wallet_id = ?1 AND status = ?2",
                params![wallet_id, status.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(total as u64)
    }

    /// List a wallet's proofs, filtered by status (defaults to UNSPENT).
    pub fn list_proofs(
        &self,
        wallet_id: i64,
        status: Option<ProofStatus>,
    ) -> StoreResult<Vec<StoredProof>> {
        let status = status.unwrap_or(ProofStatus::Unspent);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM proofs WHERE wallet_id = ?1 AND status = ?2 ORDER BY id",
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![wallet_id, status.as_str()], Self::row_to_proof)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Insert a batch of wire proofs with the given status, in one
    /// transaction. A duplicate secret aborts the whole batch: callers are
    /// required to have filtered by input-secret membership already.
    pub fn insert_proofs(
        &self,
        wallet_id: i64,
        proofs: &[Proof],
        status: ProofStatus,
    ) -> StoreResult<usize> {
        if proofs.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let inserted = Self::insert_proofs_tx(&tx, wallet_id, proofs, status)?;
        tx.commit().map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(inserted)
    }

    fn insert_proofs_tx(
        tx: &rusqlite::Transaction,
        wallet_id: i64,
        proofs: &[Proof],
        status: ProofStatus,
    ) -> StoreResult<usize> {
        let now = Utc::now().to_rfc3339();
        let mut stmt = tx
            .prepare(
                r#"
                INSERT INTO proofs
                    (wallet_id, keyset_id, amount, secret, c, dleq, witness, status, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        for proof in proofs {
            let dleq = proof
                .dleq
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default());
            stmt.execute(params![
                wallet_id,
                proof.id,
                proof.amount as i64,
                proof.secret,
                proof.c,
                dleq,
                proof.witness,
                status.as_str(),
                now,
            ])
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Duplicate(format!("proof secret {}", proof.secret))
                }
                other => StoreError::Database(other.to_string()),
            })?;
        }
        Ok(proofs.len())
    }

    /// Set the status of a set of proofs by secret, in one statement,
    /// constrained to `wallet_id` so one wallet can never flip another
    /// wallet's rows. SPENT rows are terminal and are not downgraded.
    pub fn update_status(
        &self,
        wallet_id: i64,
        secrets: &[String],
        status: ProofStatus,
    ) -> StoreResult<usize> {
        if secrets.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        Self::update_status_conn(&conn, wallet_id, secrets, status)
    }

    fn update_status_conn(
        conn: &rusqlite::Connection,
        wallet_id: i64,
        secrets: &[String],
        status: ProofStatus,
    ) -> StoreResult<usize> {
        if secrets.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; secrets.len()].join(", ");
        let guard = if status == ProofStatus::Spent {
            ""
        } else {
            " AND status <> 'SPENT'"
        };
        let sql = format!(
            "UPDATE proofs SET status = ? WHERE wallet_id = ? AND secret IN ({placeholders}){guard}"
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(secrets.len() + 2);
        values.push(status.as_str().to_string().into());
        values.push(wallet_id.into());
        for secret in secrets {
            values.push(secret.clone().into());
        }

        conn.execute(&sql, params_from_iter(values))
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Persist the outcome of a mint swap as one atomic step:
    /// consumed inputs become SPENT, genuinely new keep proofs are inserted
    /// UNSPENT, genuinely new send proofs are inserted PENDING, and inputs
    /// the mint returned verbatim in the send bundle flip to PENDING.
    pub fn record_swap_outcome(
        &self,
        wallet_id: i64,
        spent_secrets: &[String],
        new_unspent: &[Proof],
        new_pending: &[Proof],
        repending_secrets: &[String],
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Self::update_status_conn(&tx, wallet_id, spent_secrets, ProofStatus::Spent)?;
        Self::insert_proofs_tx(&tx, wallet_id, new_unspent, ProofStatus::Unspent)?;
        Self::insert_proofs_tx(&tx, wallet_id, new_pending, ProofStatus::Pending)?;
        Self::update_status_conn(&tx, wallet_id, repending_secrets, ProofStatus::Pending)?;

        tx.commit().map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
