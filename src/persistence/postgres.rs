//! PostgreSQL implementation of the stores.
//!
//! Conditional transitions lock the row (`SELECT ... FOR UPDATE`) inside a
//! transaction before comparing statuses. The one-active-lease rules are
//! enforced by partial unique indexes (see `migrations/`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::models::{AccountRow, LeaseRow};
use super::{
    AccountStore, CounterSnapshot, CounterStore, LeaseQuery, LeaseStore, Page,
    account_lease_conflict, principal_lease_conflict, status_conflict,
};
use crate::domain::{
    Account, AccountStatus, CounterIncrements, Lease, LeaseId, LeaseStatus, PoolCounter,
};
use crate::error::GatewayError;

const ACCOUNT_COLUMNS: &str = "id, account_status, admin_role_arn, principal_role_arn, \
     principal_policy_hash, created_on, last_modified_on";

const LEASE_COLUMNS: &str = "id, principal_id, account_id, lease_status, lease_status_reason, \
     budget_amount, budget_currency, budget_notification_emails, expires_on, created_on, \
     last_modified_on, lease_status_modified_on";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::Persistence`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::Persistence(e.to_string()))
    }
}

impl PostgresStore {
    /// Maps a failed lease write, naming the account of the lease that
    /// already holds a one-active-lease index slot.
    async fn lease_write_error(&self, err: sqlx::Error, lease: &Lease) -> GatewayError {
        let constraint = match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Some(db.constraint().unwrap_or_default().to_string())
            }
            _ => None,
        };
        let Some(constraint) = constraint else {
            return GatewayError::from(err);
        };

        match constraint.as_str() {
            "leases_one_active_per_principal" => {
                let holder = sqlx::query_scalar::<_, String>(
                    "SELECT account_id FROM leases \
                     WHERE principal_id = $1 AND lease_status = 'Active' AND id <> $2 LIMIT 1",
                )
                .bind(&lease.principal_id)
                .bind(lease.id.as_uuid())
                .fetch_optional(&self.pool)
                .await;
                let account_id = match holder {
                    Ok(Some(account_id)) => account_id,
                    Ok(None) => lease.account_id.clone(),
                    Err(e) => {
                        tracing::warn!(principal_id = %lease.principal_id, error = %e, "failed to look up conflicting lease");
                        lease.account_id.clone()
                    }
                };
                principal_lease_conflict(&account_id)
            }
            "leases_one_active_per_account" => account_lease_conflict(&lease.account_id),
            _ => GatewayError::Conflict(format!("lease {} already exists", lease.id)),
        }
    }
}

#[async_trait]
impl AccountStore for PostgresStore {
    async fn insert(&self, account: &Account) -> Result<(), GatewayError> {
        let result = sqlx::query(
            "INSERT INTO accounts (id, account_status, admin_role_arn, principal_role_arn, \
             principal_policy_hash, created_on, last_modified_on) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&account.id)
        .bind(account.account_status.as_str())
        .bind(&account.admin_role_arn)
        .bind(&account.principal_role_arn)
        .bind(&account.principal_policy_hash)
        .bind(account.created_on)
        .bind(account.last_modified_on)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                GatewayError::Conflict(format!("account {} already exists", account.id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Account, GatewayError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| GatewayError::not_found("account", id))?
            .try_into()
    }

    async fn list(&self, status: Option<AccountStatus>) -> Result<Vec<Account>, GatewayError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, AccountRow>(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_status = $1 ORDER BY id"
            ))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, AccountRow>(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"
            ))
            .fetch_all(&self.pool)
            .await
        }?;

        rows.into_iter().map(Account::try_from).collect()
    }

    async fn compare_and_swap(
        &self,
        expected: AccountStatus,
        account: &Account,
    ) -> Result<Account, GatewayError> {
        let mut tx = self.pool.begin().await?;
        let current: Account = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(&account.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| GatewayError::not_found("account", account.id.as_str()))?
        .try_into()?;

        if current.account_status != expected {
            return Err(status_conflict(
                "account",
                &account.id,
                expected.as_str(),
                current.account_status.as_str(),
            ));
        }

        sqlx::query(
            "UPDATE accounts SET account_status = $2, admin_role_arn = $3, \
             principal_role_arn = $4, principal_policy_hash = $5, last_modified_on = $6 \
             WHERE id = $1",
        )
        .bind(&account.id)
        .bind(account.account_status.as_str())
        .bind(&account.admin_role_arn)
        .bind(&account.principal_role_arn)
        .bind(&account.principal_policy_hash)
        .bind(account.last_modified_on)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(current)
    }

    async fn delete(&self, id: &str, expected: AccountStatus) -> Result<Account, GatewayError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "DELETE FROM accounts WHERE id = $1 AND account_status = $2 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let current = AccountStore::get(self, id).await?;
                Err(status_conflict(
                    "account",
                    id,
                    expected.as_str(),
                    current.account_status.as_str(),
                ))
            }
        }
    }
}

#[async_trait]
impl LeaseStore for PostgresStore {
    async fn insert(&self, lease: &Lease) -> Result<(), GatewayError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO leases ({LEASE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(lease.id.as_uuid())
        .bind(&lease.principal_id)
        .bind(&lease.account_id)
        .bind(lease.lease_status.as_str())
        .bind(lease.lease_status_reason.as_str())
        .bind(lease.budget_amount)
        .bind(&lease.budget_currency)
        .bind(&lease.budget_notification_emails)
        .bind(lease.expires_on)
        .bind(lease.created_on)
        .bind(lease.last_modified_on)
        .bind(lease.lease_status_modified_on)
        .execute(&self.pool)
        .await;
        if let Err(e) = inserted {
            return Err(self.lease_write_error(e, lease).await);
        }
        Ok(())
    }

    async fn get(&self, id: LeaseId) -> Result<Lease, GatewayError> {
        let row = sqlx::query_as::<_, LeaseRow>(&format!(
            "SELECT {LEASE_COLUMNS} FROM leases WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| GatewayError::not_found("lease", id.to_string()))?
            .try_into()
    }

    async fn list_page(&self, query: &LeaseQuery) -> Result<Page<Lease>, GatewayError> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {LEASE_COLUMNS} FROM leases WHERE TRUE"));
        if let Some(principal_id) = &query.principal_id {
            builder.push(" AND principal_id = ").push_bind(principal_id);
        }
        if let Some(account_id) = &query.account_id {
            builder.push(" AND account_id = ").push_bind(account_id);
        }
        if let Some(status) = query.status {
            builder.push(" AND lease_status = ").push_bind(status.as_str());
        }
        if let Some(after) = query.after {
            builder.push(" AND id > ").push_bind(*after.as_uuid());
        }
        let fetch = i64::try_from(query.limit.saturating_add(1)).unwrap_or(i64::MAX);
        builder.push(" ORDER BY id LIMIT ").push_bind(fetch);

        let rows = builder
            .build_query_as::<LeaseRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut items = rows
            .into_iter()
            .map(Lease::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let next = if items.len() > query.limit {
            items.truncate(query.limit);
            items.last().map(|lease| lease.id)
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn compare_and_swap(
        &self,
        expected: LeaseStatus,
        lease: &Lease,
    ) -> Result<Lease, GatewayError> {
        let mut tx = self.pool.begin().await?;
        let current: Lease = sqlx::query_as::<_, LeaseRow>(&format!(
            "SELECT {LEASE_COLUMNS} FROM leases WHERE id = $1 FOR UPDATE"
        ))
        .bind(lease.id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| GatewayError::not_found("lease", lease.id.to_string()))?
        .try_into()?;

        if current.lease_status != expected {
            return Err(status_conflict(
                "lease",
                &lease.id.to_string(),
                expected.as_str(),
                current.lease_status.as_str(),
            ));
        }

        let updated = sqlx::query(
            "UPDATE leases SET lease_status = $2, lease_status_reason = $3, budget_amount = $4, \
             budget_currency = $5, budget_notification_emails = $6, expires_on = $7, \
             last_modified_on = $8, lease_status_modified_on = $9 WHERE id = $1",
        )
        .bind(lease.id.as_uuid())
        .bind(lease.lease_status.as_str())
        .bind(lease.lease_status_reason.as_str())
        .bind(lease.budget_amount)
        .bind(&lease.budget_currency)
        .bind(&lease.budget_notification_emails)
        .bind(lease.expires_on)
        .bind(lease.last_modified_on)
        .bind(lease.lease_status_modified_on)
        .execute(&mut *tx)
        .await;
        if let Err(e) = updated {
            drop(tx);
            return Err(self.lease_write_error(e, lease).await);
        }

        tx.commit().await?;
        Ok(current)
    }
}

#[async_trait]
impl CounterStore for PostgresStore {
    async fn increment(&self, counter: PoolCounter, delta: i64) -> Result<i64, GatewayError> {
        let value = sqlx::query_scalar::<_, i64>(
            "INSERT INTO pool_counters (name, value) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET value = pool_counters.value + EXCLUDED.value \
             RETURNING value",
        )
        .bind(counter.as_str())
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn snapshot(&self) -> Result<CounterSnapshot, GatewayError> {
        let rows = sqlx::query_as::<_, (String, i64)>("SELECT name, value FROM pool_counters")
            .fetch_all(&self.pool)
            .await?;
        let last_initialized = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_initialized FROM pool_counter_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let counts = rows
            .into_iter()
            .filter_map(|(name, value)| PoolCounter::from_name(&name).map(|c| (c, value)))
            .collect();
        Ok(CounterSnapshot {
            counts,
            last_initialized,
        })
    }

    async fn reinitialize(
        &self,
        counts: &CounterIncrements,
        at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;
        for counter in PoolCounter::ALL {
            sqlx::query(
                "INSERT INTO pool_counters (name, value) VALUES ($1, $2) \
                 ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(counter.as_str())
            .bind(counts.get(&counter).copied().unwrap_or(0))
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "INSERT INTO pool_counter_state (id, last_initialized) VALUES (1, $1) \
             ON CONFLICT (id) DO UPDATE SET last_initialized = EXCLUDED.last_initialized",
        )
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
