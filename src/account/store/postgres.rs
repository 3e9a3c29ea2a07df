//! Postgres-backed credential store (`sql/schema.sql`).
//!
//! Identities and the admin log are kept as JSONB on the user row. Public keys
//! are mirrored into `user_public_keys` so uniqueness holds across users.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgRow, types::Json, PgPool, Postgres, Row, Transaction};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{StoreError, UniqueField, UserStore};
use crate::account::models::{AdminLogEntry, Identity, User, VerificationToken};

const USER_COLUMNS: &str = "u.id, u.email, u.username, u.hashed_password, u.admin, \
    u.email_verified, u.locked, u.deactivated, u.failed_login_attempts, u.last_login_time, \
    u.identities, u.new_user_token_hash, u.new_user_token_expiry, u.update_key_token_hash, \
    u.update_key_token_expiry, u.reset_password_token_hash, u.reset_password_token_expiry, \
    u.paywall_address, u.paywall_amount, u.paywall_tx_not_before, u.paywall_poll_expiry, \
    u.paywall_tx_id, u.email_notifications, u.proposal_credits, u.admin_log, u.created_at";

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, bind: QueryBind<'_>) -> anyhow::Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users u {clause}");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let q = sqlx::query(&query);
        let q = match bind {
            QueryBind::Id(id) => q.bind(id),
            QueryBind::Text(text) => q.bind(text),
        };
        let row = q
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load user")?;
        row.map(|row| user_from_row(&row)).transpose()
    }

    async fn write(&self, user: &User, insert: bool) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to start user transaction")?;

        let (query, operation) = if insert {
            (INSERT_USER, "INSERT")
        } else {
            (UPDATE_USER, "UPDATE")
        };
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.statement = query
        );
        let result = bind_user(sqlx::query(query), user)
            .execute(&mut *tx)
            .instrument(span)
            .await;
        match result {
            Ok(done) if !insert && done.rows_affected() == 0 => {
                return Err(StoreError::Backend(anyhow::anyhow!("user {} not found", user.id)));
            }
            Ok(_) => {}
            Err(err) => return Err(map_write_error(err)),
        }

        claim_public_keys(&mut tx, user).await?;

        tx.commit()
            .await
            .context("failed to commit user transaction")?;
        Ok(())
    }
}

enum QueryBind<'a> {
    Id(Uuid),
    Text(&'a str),
}

const INSERT_USER: &str = r"
    INSERT INTO users (
        id, email, username, hashed_password, admin, email_verified, locked, deactivated,
        failed_login_attempts, last_login_time, identities,
        new_user_token_hash, new_user_token_expiry,
        update_key_token_hash, update_key_token_expiry,
        reset_password_token_hash, reset_password_token_expiry,
        paywall_address, paywall_amount, paywall_tx_not_before, paywall_poll_expiry,
        paywall_tx_id, email_notifications, proposal_credits, admin_log, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
            $18, $19, $20, $21, $22, $23, $24, $25, $26)
";

const UPDATE_USER: &str = r"
    UPDATE users SET
        email = $2, username = $3, hashed_password = $4, admin = $5, email_verified = $6,
        locked = $7, deactivated = $8, failed_login_attempts = $9, last_login_time = $10,
        identities = $11,
        new_user_token_hash = $12, new_user_token_expiry = $13,
        update_key_token_hash = $14, update_key_token_expiry = $15,
        reset_password_token_hash = $16, reset_password_token_expiry = $17,
        paywall_address = $18, paywall_amount = $19, paywall_tx_not_before = $20,
        paywall_poll_expiry = $21, paywall_tx_id = $22, email_notifications = $23,
        proposal_credits = $24, admin_log = $25, created_at = $26
    WHERE id = $1
";

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

fn token_parts(token: Option<&VerificationToken>) -> (Option<Vec<u8>>, Option<i64>) {
    token.map_or((None, None), |token| (Some(token.hash.clone()), Some(token.expiry)))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn bind_user<'q>(query: PgQuery<'q>, user: &User) -> PgQuery<'q> {
    let (new_user_hash, new_user_expiry) = token_parts(user.new_user_token.as_ref());
    let (update_key_hash, update_key_expiry) = token_parts(user.update_key_token.as_ref());
    let (reset_hash, reset_expiry) = token_parts(user.reset_password_token.as_ref());
    query
        .bind(user.id)
        .bind(user.email.clone())
        .bind(user.username.clone())
        .bind(user.hashed_password.clone())
        .bind(user.admin)
        .bind(user.email_verified)
        .bind(user.locked)
        .bind(user.deactivated)
        .bind(i32::try_from(user.failed_login_attempts).unwrap_or(i32::MAX))
        .bind(user.last_login_time)
        .bind(Json(user.identities.clone()))
        .bind(new_user_hash)
        .bind(new_user_expiry)
        .bind(update_key_hash)
        .bind(update_key_expiry)
        .bind(reset_hash)
        .bind(reset_expiry)
        .bind(user.paywall_address.clone())
        .bind(to_i64(user.paywall_amount))
        .bind(user.paywall_tx_not_before)
        .bind(user.paywall_poll_expiry)
        .bind(user.paywall_tx_id.clone())
        .bind(to_i64(user.email_notifications))
        .bind(to_i64(user.proposal_credits))
        .bind(Json(user.admin_log.clone()))
        .bind(user.created_at)
}

fn is_unique_violation(err: &sqlx::Error) -> Option<Option<String>> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().is_some_and(|code| code.as_ref() == "23505") => {
            Some(db_err.constraint().map(ToString::to_string))
        }
        _ => None,
    }
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    match is_unique_violation(&err) {
        Some(Some(constraint)) if constraint == "users_email_key" => {
            StoreError::Duplicate(UniqueField::Email)
        }
        Some(Some(constraint)) if constraint == "users_username_key" => {
            StoreError::Duplicate(UniqueField::Username)
        }
        _ => StoreError::Backend(anyhow::Error::new(err).context("failed to write user")),
    }
}

async fn claim_public_keys(
    tx: &mut Transaction<'_, Postgres>,
    user: &User,
) -> Result<(), StoreError> {
    let keys: Vec<String> = user
        .identities
        .iter()
        .map(|identity| identity.public_key.clone())
        .collect();

    let query = r"
        INSERT INTO user_public_keys (public_key, user_id)
        SELECT key, $2 FROM UNNEST($1::text[]) AS key
        ON CONFLICT (public_key) DO NOTHING
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&keys)
        .bind(user.id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to record public keys")?;

    let query = r"
        SELECT EXISTS (
            SELECT 1 FROM user_public_keys WHERE public_key = ANY($1) AND user_id <> $2
        )
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let taken: bool = sqlx::query_scalar(query)
        .bind(&keys)
        .bind(user.id)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check public key ownership")?;
    if taken {
        return Err(StoreError::Duplicate(UniqueField::PublicKey));
    }
    Ok(())
}

fn token_from_row(row: &PgRow, hash: &str, expiry: &str) -> anyhow::Result<Option<VerificationToken>> {
    let hash: Option<Vec<u8>> = row.try_get(hash)?;
    let expiry: Option<i64> = row.try_get(expiry)?;
    Ok(hash.zip(expiry).map(|(hash, expiry)| VerificationToken { hash, expiry }))
}

fn user_from_row(row: &PgRow) -> anyhow::Result<User> {
    let identities: Json<Vec<Identity>> = row.try_get("identities")?;
    let admin_log: Json<Vec<AdminLogEntry>> = row.try_get("admin_log")?;
    let failed: i32 = row.try_get("failed_login_attempts")?;
    let amount: i64 = row.try_get("paywall_amount")?;
    let notifications: i64 = row.try_get("email_notifications")?;
    let credits: i64 = row.try_get("proposal_credits")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        hashed_password: row.try_get("hashed_password")?,
        admin: row.try_get("admin")?,
        email_verified: row.try_get("email_verified")?,
        locked: row.try_get("locked")?,
        deactivated: row.try_get("deactivated")?,
        failed_login_attempts: u32::try_from(failed).unwrap_or(0),
        last_login_time: row.try_get("last_login_time")?,
        identities: identities.0,
        new_user_token: token_from_row(row, "new_user_token_hash", "new_user_token_expiry")?,
        update_key_token: token_from_row(row, "update_key_token_hash", "update_key_token_expiry")?,
        reset_password_token: token_from_row(
            row,
            "reset_password_token_hash",
            "reset_password_token_expiry",
        )?,
        paywall_address: row.try_get("paywall_address")?,
        paywall_amount: u64::try_from(amount).unwrap_or(0),
        paywall_tx_not_before: row.try_get("paywall_tx_not_before")?,
        paywall_poll_expiry: row.try_get("paywall_poll_expiry")?,
        paywall_tx_id: row.try_get("paywall_tx_id")?,
        email_notifications: u64::try_from(notifications).unwrap_or(0),
        proposal_credits: u64::try_from(credits).unwrap_or(0),
        admin_log: admin_log.0,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        self.write(user, true).await
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        self.write(user, false).await
    }

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        self.fetch_one_where("WHERE u.id = $1", QueryBind::Id(id)).await
    }

    async fn get_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_where("WHERE lower(u.email) = lower($1)", QueryBind::Text(email))
            .await
    }

    async fn get_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_where("WHERE u.username = $1", QueryBind::Text(username))
            .await
    }

    async fn get_by_public_key(&self, public_key: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_where(
            "JOIN user_public_keys k ON k.user_id = u.id WHERE k.public_key = $1",
            QueryBind::Text(public_key),
        )
        .await
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users u ORDER BY u.id");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list users")?;
        rows.iter().map(user_from_row).collect()
    }

    async fn unpaid_users(&self, now: i64) -> anyhow::Result<Vec<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users u \
             WHERE u.paywall_amount > 0 AND u.paywall_tx_id IS NULL AND u.paywall_poll_expiry > $1 \
             ORDER BY u.id"
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list unpaid users")?;
        rows.iter().map(user_from_row).collect()
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let query = "SELECT 1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}
