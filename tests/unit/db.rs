use sqlx::AnyPool;
use tempfile::TempDir;
use wa_bridge::db::{self, db_kind_from_url, rewrite_sql, DbKind};
use wa_bridge::types::{Account, NotificationFlags};

async fn create_test_pool(dir: &TempDir) -> AnyPool {
    sqlx::any::install_default_drivers();
    let db_path = dir.path().join("accounts.sqlite");
    let url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
    let pool = AnyPool::connect(&url).await.unwrap();
    db::init_db(&pool, DbKind::Sqlite).await.unwrap();
    pool
}

#[test]
fn test_db_kind_from_url_sqlite() {
    assert_eq!(db_kind_from_url("sqlite://test.db"), DbKind::Sqlite);
    assert_eq!(db_kind_from_url("SQLite://test.db"), DbKind::Sqlite);
}

#[test]
fn test_db_kind_from_url_postgres() {
    assert_eq!(db_kind_from_url("postgres://localhost/bridge"), DbKind::Postgres);
    assert_eq!(db_kind_from_url("postgresql://localhost/bridge"), DbKind::Postgres);
}

#[test]
fn test_rewrite_sql() {
    let sql = "SELECT * FROM accounts WHERE owner_chat_id = ? OR instance_id = ?";
    assert_eq!(rewrite_sql(sql, DbKind::Sqlite).as_ref(), sql);
    assert_eq!(
        rewrite_sql(sql, DbKind::Postgres).as_ref(),
        "SELECT * FROM accounts WHERE owner_chat_id = $1 OR instance_id = $2"
    );
    assert_eq!(rewrite_sql("SELECT 1", DbKind::Postgres).as_ref(), "SELECT 1");
}

#[tokio::test]
async fn test_init_db_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let pool = create_test_pool(&dir).await;
    db::init_db(&pool, DbKind::Sqlite).await.unwrap();
    assert_eq!(db::count_accounts(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_replace_and_lookup() {
    let dir = TempDir::new().unwrap();
    let pool = create_test_pool(&dir).await;
    let kind = DbKind::Sqlite;

    let mut account = Account::new("555", 1101, "tok-1");
    account.user_name = Some("owner".to_string());
    let replaced = db::replace_account(&pool, kind, &account).await.unwrap();
    assert!(replaced.is_empty());

    let by_chat = db::get_account_by_chat(&pool, kind, "555").await.unwrap().unwrap();
    assert_eq!(by_chat, account);
    let by_instance = db::get_account_by_instance(&pool, kind, 1101).await.unwrap().unwrap();
    assert_eq!(by_instance.owner_chat_id, "555");
    assert!(db::get_account_by_chat(&pool, kind, "777").await.unwrap().is_none());
}

#[tokio::test]
async fn test_replace_drops_rows_sharing_owner_or_instance() {
    let dir = TempDir::new().unwrap();
    let pool = create_test_pool(&dir).await;
    let kind = DbKind::Sqlite;

    db::replace_account(&pool, kind, &Account::new("555", 1, "a")).await.unwrap();
    db::replace_account(&pool, kind, &Account::new("777", 2, "b")).await.unwrap();

    let replaced = db::replace_account(&pool, kind, &Account::new("555", 2, "c"))
        .await
        .unwrap();
    assert_eq!(replaced.len(), 2);
    assert_eq!(db::count_accounts(&pool).await.unwrap(), 1);
    assert!(db::get_account_by_instance(&pool, kind, 1).await.unwrap().is_none());
    assert!(db::get_account_by_chat(&pool, kind, "777").await.unwrap().is_none());
    let current = db::get_account_by_chat(&pool, kind, "555").await.unwrap().unwrap();
    assert_eq!(current.instance_id, 2);
    assert_eq!(current.credential_token, "c");
}

#[tokio::test]
async fn test_update_destination_and_notifications() {
    let dir = TempDir::new().unwrap();
    let pool = create_test_pool(&dir).await;
    let kind = DbKind::Sqlite;
    db::replace_account(&pool, kind, &Account::new("555", 1, "a")).await.unwrap();

    assert!(db::update_destination(&pool, kind, "555", Some("-100999")).await.unwrap());
    let flags = NotificationFlags {
        incoming: true,
        outgoing_status: false,
        instance_state: false,
    };
    assert!(db::update_notifications(&pool, kind, "555", flags).await.unwrap());

    let account = db::get_account_by_chat(&pool, kind, "555").await.unwrap().unwrap();
    assert_eq!(account.destination_chat_id.as_deref(), Some("-100999"));
    assert_eq!(account.notifications, flags);

    assert!(db::update_destination(&pool, kind, "555", None).await.unwrap());
    let account = db::get_account_by_chat(&pool, kind, "555").await.unwrap().unwrap();
    assert_eq!(account.destination_chat_id, None);

    assert!(!db::update_destination(&pool, kind, "777", Some("1")).await.unwrap());
    assert!(!db::update_notifications(&pool, kind, "777", flags).await.unwrap());
}

#[tokio::test]
async fn test_delete_account() {
    let dir = TempDir::new().unwrap();
    let pool = create_test_pool(&dir).await;
    let kind = DbKind::Sqlite;
    db::replace_account(&pool, kind, &Account::new("555", 1, "a")).await.unwrap();

    let removed = db::delete_account(&pool, kind, "555").await.unwrap();
    assert_eq!(removed.map(|a| a.instance_id), Some(1));
    assert!(db::delete_account(&pool, kind, "555").await.unwrap().is_none());
    assert_eq!(db::count_accounts(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_account_by_instance() {
    let dir = TempDir::new().unwrap();
    let pool = create_test_pool(&dir).await;
    let kind = DbKind::Sqlite;
    db::replace_account(&pool, kind, &Account::new("555", 1, "a")).await.unwrap();

    let removed = db::delete_account_by_instance(&pool, kind, 1).await.unwrap();
    assert_eq!(removed.map(|a| a.owner_chat_id), Some("555".to_string()));
    assert!(db::delete_account_by_instance(&pool, kind, 1).await.unwrap().is_none());
    assert_eq!(db::count_accounts(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_partner_token_upsert() {
    let dir = TempDir::new().unwrap();
    let pool = create_test_pool(&dir).await;
    let kind = DbKind::Sqlite;

    assert!(db::get_partner_token(&pool, kind, "555").await.unwrap().is_none());
    db::upsert_partner_token(&pool, kind, "555", "gac.first").await.unwrap();
    db::upsert_partner_token(&pool, kind, "555", "gac.second").await.unwrap();
    assert_eq!(
        db::get_partner_token(&pool, kind, "555").await.unwrap().as_deref(),
        Some("gac.second")
    );
    assert!(db::get_partner_token(&pool, kind, "777").await.unwrap().is_none());
}
