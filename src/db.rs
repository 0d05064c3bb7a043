use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::borrow::Cow;

use crate::types::{Account, NotificationFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql(sql: &str, kind: DbKind) -> Cow<'_, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

fn flag(value: bool) -> i64 {
    i64::from(value)
}

const ACCOUNT_COLUMNS: &str = "owner_chat_id, instance_id, credential_token, user_name, destination_chat_id, \
     notify_incoming, notify_outgoing, notify_state";

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<(), sqlx::Error> {
    let stmts = [
        r#"CREATE TABLE IF NOT EXISTS accounts (
            owner_chat_id TEXT PRIMARY KEY,
            instance_id BIGINT NOT NULL UNIQUE,
            credential_token TEXT NOT NULL,
            user_name TEXT,
            destination_chat_id TEXT,
            notify_incoming BIGINT NOT NULL,
            notify_outgoing BIGINT NOT NULL,
            notify_state BIGINT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_accounts_instance ON accounts(instance_id)"#,
        r#"CREATE TABLE IF NOT EXISTS partner_tokens (
            chat_id TEXT PRIMARY KEY,
            token TEXT NOT NULL,
            updated_at BIGINT NOT NULL
        )"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }
    Ok(())
}

fn account_from_row(row: &AnyRow) -> Result<Account, sqlx::Error> {
    let incoming: i64 = row.try_get("notify_incoming")?;
    let outgoing: i64 = row.try_get("notify_outgoing")?;
    let state: i64 = row.try_get("notify_state")?;
    Ok(Account {
        owner_chat_id: row.try_get("owner_chat_id")?,
        instance_id: row.try_get("instance_id")?,
        credential_token: row.try_get("credential_token")?,
        user_name: row.try_get("user_name")?,
        destination_chat_id: row.try_get("destination_chat_id")?,
        notifications: NotificationFlags {
            incoming: incoming != 0,
            outgoing_status: outgoing != 0,
            instance_state: state != 0,
        },
    })
}

pub async fn get_account_by_chat(
    pool: &AnyPool,
    kind: DbKind,
    owner_chat_id: &str,
) -> Result<Option<Account>, sqlx::Error> {
    let base = format!("SELECT {} FROM accounts WHERE owner_chat_id = ?", ACCOUNT_COLUMNS);
    let sql = rewrite_sql(&base, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(owner_chat_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(account_from_row).transpose()
}

pub async fn get_account_by_instance(
    pool: &AnyPool,
    kind: DbKind,
    instance_id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    let base = format!("SELECT {} FROM accounts WHERE instance_id = ?", ACCOUNT_COLUMNS);
    let sql = rewrite_sql(&base, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(instance_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(account_from_row).transpose()
}

/// Inserts `account`, dropping any row that shares its owner or instance.
/// Returns the rows that were replaced.
pub async fn replace_account(
    pool: &AnyPool,
    kind: DbKind,
    account: &Account,
) -> Result<Vec<Account>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let select = format!(
        "SELECT {} FROM accounts WHERE owner_chat_id = ? OR instance_id = ?",
        ACCOUNT_COLUMNS
    );
    let select_sql = rewrite_sql(&select, kind);
    let rows = sqlx::query(select_sql.as_ref())
        .bind(&account.owner_chat_id)
        .bind(account.instance_id)
        .fetch_all(&mut *tx)
        .await?;
    let replaced = rows
        .iter()
        .map(account_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let delete_sql = rewrite_sql(
        "DELETE FROM accounts WHERE owner_chat_id = ? OR instance_id = ?",
        kind,
    );
    sqlx::query(delete_sql.as_ref())
        .bind(&account.owner_chat_id)
        .bind(account.instance_id)
        .execute(&mut *tx)
        .await?;

    let now = Utc::now().timestamp();
    let insert_sql = rewrite_sql(
        r#"INSERT INTO accounts (
            owner_chat_id, instance_id, credential_token, user_name, destination_chat_id,
            notify_incoming, notify_outgoing, notify_state, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        kind,
    );
    sqlx::query(insert_sql.as_ref())
        .bind(&account.owner_chat_id)
        .bind(account.instance_id)
        .bind(&account.credential_token)
        .bind(account.user_name.as_deref())
        .bind(account.destination_chat_id.as_deref())
        .bind(flag(account.notifications.incoming))
        .bind(flag(account.notifications.outgoing_status))
        .bind(flag(account.notifications.instance_state))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(replaced)
}

pub async fn delete_account(
    pool: &AnyPool,
    kind: DbKind,
    owner_chat_id: &str,
) -> Result<Option<Account>, sqlx::Error> {
    let existing = get_account_by_chat(pool, kind, owner_chat_id).await?;
    if existing.is_some() {
        let sql = rewrite_sql("DELETE FROM accounts WHERE owner_chat_id = ?", kind);
        sqlx::query(sql.as_ref())
            .bind(owner_chat_id)
            .execute(pool)
            .await?;
    }
    Ok(existing)
}

pub async fn delete_account_by_instance(
    pool: &AnyPool,
    kind: DbKind,
    instance_id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    let existing = get_account_by_instance(pool, kind, instance_id).await?;
    if existing.is_some() {
        let sql = rewrite_sql("DELETE FROM accounts WHERE instance_id = ?", kind);
        sqlx::query(sql.as_ref())
            .bind(instance_id)
            .execute(pool)
            .await?;
    }
    Ok(existing)
}

pub async fn update_destination(
    pool: &AnyPool,
    kind: DbKind,
    owner_chat_id: &str,
    destination: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let sql = rewrite_sql(
        "UPDATE accounts SET destination_chat_id = ?, updated_at = ? WHERE owner_chat_id = ?",
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(destination)
        .bind(Utc::now().timestamp())
        .bind(owner_chat_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_notifications(
    pool: &AnyPool,
    kind: DbKind,
    owner_chat_id: &str,
    flags: NotificationFlags,
) -> Result<bool, sqlx::Error> {
    let sql = rewrite_sql(
        "UPDATE accounts SET notify_incoming = ?, notify_outgoing = ?, notify_state = ?, updated_at = ? \
         WHERE owner_chat_id = ?",
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(flag(flags.incoming))
        .bind(flag(flags.outgoing_status))
        .bind(flag(flags.instance_state))
        .bind(Utc::now().timestamp())
        .bind(owner_chat_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_partner_token(
    pool: &AnyPool,
    kind: DbKind,
    chat_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let sql = rewrite_sql("SELECT token FROM partner_tokens WHERE chat_id = ?", kind);
    let row = sqlx::query(sql.as_ref())
        .bind(chat_id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| r.try_get("token")).transpose()
}

pub async fn upsert_partner_token(
    pool: &AnyPool,
    kind: DbKind,
    chat_id: &str,
    token: &str,
) -> Result<(), sqlx::Error> {
    let sql = rewrite_sql(
        r#"INSERT INTO partner_tokens (chat_id, token, updated_at) VALUES (?, ?, ?)
           ON CONFLICT(chat_id) DO UPDATE SET token = excluded.token, updated_at = excluded.updated_at"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(chat_id)
        .bind(token)
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_accounts(pool: &AnyPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM accounts")
        .fetch_one(pool)
        .await
}
