#[path = "../support/mod.rs"]
mod support;

use async_trait::async_trait;
use sqlx::AnyPool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{account, MemoryRegistry};
use tempfile::TempDir;
use tokio::sync::Notify;
use wa_bridge::db::{self, DbKind};
use wa_bridge::registry::{AccountRegistry, CachedRegistry, SqlAccountRegistry};
use wa_bridge::types::{Account, NotificationFlags};
use wa_bridge::Result;

/// Counts lookups that reach the wrapped registry.
#[derive(Default)]
struct Counting {
    inner: MemoryRegistry,
    lookups: AtomicUsize,
}

impl Counting {
    fn with(accounts: Vec<Account>) -> Self {
        Self {
            inner: MemoryRegistry::with(accounts),
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountRegistry for Counting {
    async fn find_by_chat(&self, chat_id: &str) -> Result<Option<Account>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_chat(chat_id).await
    }

    async fn find_by_instance(&self, instance_id: i64) -> Result<Option<Account>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_instance(instance_id).await
    }

    async fn bind(&self, account: Account) -> Result<Account> {
        self.inner.bind(account).await
    }

    async fn unbind(&self, owner_chat_id: &str) -> Result<Option<Account>> {
        self.inner.unbind(owner_chat_id).await
    }

    async fn set_destination(&self, owner_chat_id: &str, destination: Option<&str>) -> Result<bool> {
        self.inner.set_destination(owner_chat_id, destination).await
    }

    async fn set_notifications(&self, owner_chat_id: &str, flags: NotificationFlags) -> Result<bool> {
        self.inner.set_notifications(owner_chat_id, flags).await
    }

    async fn unbind_instance(&self, instance_id: i64) -> Result<Option<Account>> {
        self.inner.unbind_instance(instance_id).await
    }

    async fn partner_token(&self, chat_id: &str) -> Result<Option<String>> {
        self.inner.partner_token(chat_id).await
    }

    async fn set_partner_token(&self, chat_id: &str, token: &str) -> Result<()> {
        self.inner.set_partner_token(chat_id, token).await
    }
}

/// Pauses the first chat lookup after it has read the row, until released.
#[derive(Default)]
struct Gated {
    inner: MemoryRegistry,
    armed: AtomicBool,
    paused: Notify,
    release: Notify,
}

#[async_trait]
impl AccountRegistry for Gated {
    async fn find_by_chat(&self, chat_id: &str) -> Result<Option<Account>> {
        let found = self.inner.find_by_chat(chat_id).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.paused.notify_one();
            self.release.notified().await;
        }
        Ok(found)
    }

    async fn find_by_instance(&self, instance_id: i64) -> Result<Option<Account>> {
        self.inner.find_by_instance(instance_id).await
    }

    async fn bind(&self, account: Account) -> Result<Account> {
        self.inner.bind(account).await
    }

    async fn unbind(&self, owner_chat_id: &str) -> Result<Option<Account>> {
        self.inner.unbind(owner_chat_id).await
    }

    async fn set_destination(&self, owner_chat_id: &str, destination: Option<&str>) -> Result<bool> {
        self.inner.set_destination(owner_chat_id, destination).await
    }

    async fn set_notifications(&self, owner_chat_id: &str, flags: NotificationFlags) -> Result<bool> {
        self.inner.set_notifications(owner_chat_id, flags).await
    }

    async fn unbind_instance(&self, instance_id: i64) -> Result<Option<Account>> {
        self.inner.unbind_instance(instance_id).await
    }

    async fn partner_token(&self, chat_id: &str) -> Result<Option<String>> {
        self.inner.partner_token(chat_id).await
    }

    async fn set_partner_token(&self, chat_id: &str, token: &str) -> Result<()> {
        self.inner.set_partner_token(chat_id, token).await
    }
}

async fn sql_registry(dir: &TempDir) -> SqlAccountRegistry {
    sqlx::any::install_default_drivers();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("accounts.sqlite").to_string_lossy());
    let pool = AnyPool::connect(&url).await.unwrap();
    db::init_db(&pool, DbKind::Sqlite).await.unwrap();
    SqlAccountRegistry::new(pool, DbKind::Sqlite)
}

#[tokio::test]
async fn test_sql_registry_bind_and_resolve() {
    let dir = TempDir::new().unwrap();
    let registry = sql_registry(&dir).await;

    registry.bind(account("555", 1101)).await.unwrap();
    assert_eq!(registry.find_by_instance(1101).await.unwrap().unwrap().owner_chat_id, "555");
    assert_eq!(registry.resolve_destination_chat("555").await.unwrap(), "555");

    assert!(registry.set_destination("555", Some("-100999")).await.unwrap());
    assert_eq!(registry.resolve_destination_chat("555").await.unwrap(), "-100999");

    // Unbound chats resolve to themselves.
    assert_eq!(registry.resolve_destination_chat("42").await.unwrap(), "42");
}

#[tokio::test]
async fn test_sql_registry_rebind_resets_settings() {
    let dir = TempDir::new().unwrap();
    let registry = sql_registry(&dir).await;

    registry.bind(account("555", 1)).await.unwrap();
    registry.set_destination("555", Some("-100999")).await.unwrap();
    registry
        .set_notifications(
            "555",
            NotificationFlags {
                incoming: false,
                ..NotificationFlags::default()
            },
        )
        .await
        .unwrap();

    registry.bind(account("555", 2)).await.unwrap();
    let current = registry.find_by_chat("555").await.unwrap().unwrap();
    assert_eq!(current.instance_id, 2);
    assert_eq!(current.destination_chat_id, None);
    assert_eq!(current.notifications, NotificationFlags::default());
    assert!(registry.find_by_instance(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sql_registry_instance_moves_between_owners() {
    let dir = TempDir::new().unwrap();
    let registry = sql_registry(&dir).await;

    registry.bind(account("555", 1)).await.unwrap();
    registry.bind(account("777", 1)).await.unwrap();

    assert!(registry.find_by_chat("555").await.unwrap().is_none());
    assert_eq!(registry.find_by_instance(1).await.unwrap().unwrap().owner_chat_id, "777");
    assert_eq!(db::count_accounts(registry.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_sql_registry_unbind() {
    let dir = TempDir::new().unwrap();
    let registry = sql_registry(&dir).await;

    registry.bind(account("555", 1)).await.unwrap();
    assert_eq!(registry.unbind("555").await.unwrap().map(|a| a.instance_id), Some(1));
    assert!(registry.unbind("555").await.unwrap().is_none());
    assert!(!registry.set_destination("555", Some("1")).await.unwrap());
}

#[tokio::test]
async fn test_cache_serves_repeat_lookups() {
    let cache = CachedRegistry::new(Counting::with(vec![account("555", 1)]), Duration::from_secs(30));

    for _ in 0..3 {
        assert!(cache.find_by_instance(1).await.unwrap().is_some());
    }
    assert_eq!(cache.inner().lookups(), 1);

    // A hit by instance also fills the chat key.
    assert!(cache.find_by_chat("555").await.unwrap().is_some());
    assert_eq!(cache.inner().lookups(), 1);
    assert_eq!(cache.cached_len(), 1);
}

#[tokio::test]
async fn test_cache_does_not_store_misses() {
    let cache = CachedRegistry::new(Counting::with(vec![]), Duration::from_secs(30));

    assert!(cache.find_by_chat("555").await.unwrap().is_none());
    cache.bind(account("555", 1)).await.unwrap();
    assert!(cache.find_by_chat("555").await.unwrap().is_some());
    assert_eq!(cache.inner().lookups(), 2);
}

#[tokio::test]
async fn test_cache_writes_are_visible_immediately() {
    let cache = CachedRegistry::new(Counting::with(vec![account("555", 1)]), Duration::from_secs(30));
    assert_eq!(cache.resolve_destination_chat("555").await.unwrap(), "555");

    cache.set_destination("555", Some("-100999")).await.unwrap();
    assert_eq!(cache.resolve_destination_chat("555").await.unwrap(), "-100999");

    let muted = NotificationFlags {
        outgoing_status: false,
        ..NotificationFlags::default()
    };
    cache.set_notifications("555", muted).await.unwrap();
    assert_eq!(cache.find_by_instance(1).await.unwrap().unwrap().notifications, muted);
}

#[tokio::test]
async fn test_cache_rebind_evicts_previous_owner_of_instance() {
    let cache = CachedRegistry::new(Counting::with(vec![account("555", 1)]), Duration::from_secs(30));
    assert!(cache.find_by_chat("555").await.unwrap().is_some());

    cache.bind(account("777", 1)).await.unwrap();

    assert!(cache.find_by_chat("555").await.unwrap().is_none());
    assert_eq!(cache.find_by_instance(1).await.unwrap().unwrap().owner_chat_id, "777");
}

#[tokio::test]
async fn test_cache_unbind_evicts_both_keys() {
    let cache = CachedRegistry::new(Counting::with(vec![account("555", 1)]), Duration::from_secs(30));
    assert!(cache.find_by_instance(1).await.unwrap().is_some());

    cache.unbind("555").await.unwrap();

    assert!(cache.find_by_instance(1).await.unwrap().is_none());
    assert!(cache.find_by_chat("555").await.unwrap().is_none());
    assert_eq!(cache.cached_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cache_entries_expire_after_ttl() {
    let cache = CachedRegistry::new(Counting::with(vec![account("555", 1)]), Duration::from_secs(30));

    cache.find_by_instance(1).await.unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    cache.find_by_instance(1).await.unwrap();
    assert_eq!(cache.inner().lookups(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    cache.find_by_instance(1).await.unwrap();
    assert_eq!(cache.inner().lookups(), 2);
}

#[tokio::test]
async fn test_zero_ttl_disables_cache() {
    let cache = CachedRegistry::new(Counting::with(vec![account("555", 1)]), Duration::ZERO);

    cache.find_by_chat("555").await.unwrap();
    cache.find_by_chat("555").await.unwrap();
    assert_eq!(cache.inner().lookups(), 2);
    assert_eq!(cache.cached_len(), 0);
}

#[tokio::test]
async fn test_sql_registry_unbind_instance_and_partner_token() {
    let dir = TempDir::new().unwrap();
    let registry = sql_registry(&dir).await;

    registry.bind(account("555", 1)).await.unwrap();
    let removed = registry.unbind_instance(1).await.unwrap();
    assert_eq!(removed.map(|a| a.owner_chat_id), Some("555".to_string()));
    assert!(registry.unbind_instance(1).await.unwrap().is_none());

    registry.set_partner_token("555", "gac.partner").await.unwrap();
    assert_eq!(registry.partner_token("555").await.unwrap().as_deref(), Some("gac.partner"));
    assert!(registry.partner_token("777").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cache_unbind_instance_evicts_owner() {
    let cache = CachedRegistry::new(Counting::with(vec![account("555", 1)]), Duration::from_secs(30));
    assert!(cache.find_by_chat("555").await.unwrap().is_some());

    cache.unbind_instance(1).await.unwrap();

    assert!(cache.find_by_chat("555").await.unwrap().is_none());
    assert_eq!(cache.cached_len(), 0);
}

#[tokio::test]
async fn test_lookup_overlapping_a_write_is_not_cached() {
    let gated = Gated {
        inner: MemoryRegistry::with(vec![account("555", 1)]),
        ..Gated::default()
    };
    gated.armed.store(true, Ordering::SeqCst);
    let cache = Arc::new(CachedRegistry::new(gated, Duration::from_secs(30)));

    let reader = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.find_by_chat("555").await })
    };
    // The reader now holds the row as it was before the write below.
    cache.inner().paused.notified().await;
    cache.set_destination("555", Some("-100999")).await.unwrap();
    cache.inner().release.notify_one();

    let stale = reader.await.unwrap().unwrap().unwrap();
    assert_eq!(stale.destination_chat_id, None);
    assert_eq!(cache.cached_len(), 0);
    assert_eq!(cache.resolve_destination_chat("555").await.unwrap(), "-100999");
}
