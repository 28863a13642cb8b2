//! Account persistence port and adapters.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::account::{Account, Role};
use crate::error::{Result, ServerError, is_unique_violation};

/// Port for account persistence.
///
/// The unique indexes on `email` and `mobile_number` are part of the
/// contract: `insert` must fail with [`ServerError::Conflict`] when a
/// concurrent writer got there first.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Find an account by its identifier.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    /// Find an account matching `email` OR `mobile_number`.
    async fn find_by_contact(
        &self,
        email: Option<&str>,
        mobile_number: Option<&str>,
    ) -> Result<Option<Account>>;

    /// Find an account by `email` only.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Persist a new account.
    async fn insert(&self, account: &Account) -> Result<()>;

    /// Overwrite the role of an existing account.
    async fn update_role(&self, id: Uuid, role: Role) -> Result<()>;

    /// Flip `is_verified` to true. Idempotent.
    async fn mark_verified(&self, id: Uuid) -> Result<()>;
}

const SELECT_COLUMNS: &str = r#"SELECT
        id,
        first_name,
        last_name,
        email,
        mobile_number,
        password_hash,
        role,
        is_verified,
        created_at,
        updated_at
    FROM accounts"#;

/// Postgres adapter for [`AccountStore`].
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Create a new [`PgAccountStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("{SELECT_COLUMNS} WHERE id = $1");
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    async fn find_by_contact(
        &self,
        email: Option<&str>,
        mobile_number: Option<&str>,
    ) -> Result<Option<Account>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(SELECT_COLUMNS);
        builder.push(" WHERE false");
        if let Some(email) = email {
            builder.push(" OR email = ").push_bind(email);
        }
        if let Some(mobile_number) = mobile_number {
            builder.push(" OR mobile_number = ").push_bind(mobile_number);
        }
        builder.push(" LIMIT 1");

        let account = builder
            .build_query_as::<Account>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.find_by_contact(Some(email), None).await
    }

    async fn insert(&self, account: &Account) -> Result<()> {
        let result = sqlx::query(
            r#"INSERT INTO accounts
                (id, first_name, last_name, email, mobile_number, password_hash, role, is_verified)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(account.id)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.email)
        .bind(&account.mobile_number)
        .bind(&account.password_hash)
        .bind(account.role)
        .bind(account.is_verified)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(ServerError::Conflict(
                    "an account with this email or mobile number already exists"
                        .into(),
                ))
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<()> {
        sqlx::query(
            r#"UPDATE accounts SET role = $1, updated_at = NOW() WHERE id = $2"#,
        )
        .bind(role)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_verified(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"UPDATE accounts SET is_verified = TRUE, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-memory adapter mirroring the Postgres uniqueness rules.
///
/// MUST NEVER be used in production.
#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        accounts: Mutex<Vec<Account>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.accounts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AccountStore for MemoryStore {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
            let accounts = self.accounts.lock().unwrap();
            Ok(accounts.iter().find(|a| a.id == id).cloned())
        }

        async fn find_by_contact(
            &self,
            email: Option<&str>,
            mobile_number: Option<&str>,
        ) -> Result<Option<Account>> {
            let accounts = self.accounts.lock().unwrap();
            Ok(accounts
                .iter()
                .find(|a| {
                    email.is_some_and(|e| a.email == e)
                        || mobile_number.is_some_and(|m| {
                            a.mobile_number.as_deref() == Some(m)
                        })
                })
                .cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
            self.find_by_contact(Some(email), None).await
        }

        async fn insert(&self, account: &Account) -> Result<()> {
            let mut accounts = self.accounts.lock().unwrap();
            let collision = accounts.iter().any(|a| {
                a.email == account.email
                    || (a.mobile_number.is_some()
                        && a.mobile_number == account.mobile_number)
            });
            if collision {
                return Err(ServerError::Conflict(
                    "an account with this email or mobile number already exists"
                        .into(),
                ));
            }

            accounts.push(account.clone());
            Ok(())
        }

        async fn update_role(&self, id: Uuid, role: Role) -> Result<()> {
            let mut accounts = self.accounts.lock().unwrap();
            if let Some(account) = accounts.iter_mut().find(|a| a.id == id) {
                account.role = Some(role);
                account.updated_at = chrono::Utc::now();
            }
            Ok(())
        }

        async fn mark_verified(&self, id: Uuid) -> Result<()> {
            let mut accounts = self.accounts.lock().unwrap();
            if let Some(account) = accounts.iter_mut().find(|a| a.id == id) {
                account.is_verified = true;
                account.updated_at = chrono::Utc::now();
            }
            Ok(())
        }
    }
}
