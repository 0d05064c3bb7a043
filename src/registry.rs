use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::AnyPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::db::{self, DbKind};
use crate::error::Result;
use crate::types::{redact_token, Account, NotificationFlags};

/// Key-based store of bound accounts.
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    async fn find_by_chat(&self, chat_id: &str) -> Result<Option<Account>>;

    async fn find_by_instance(&self, instance_id: i64) -> Result<Option<Account>>;

    /// Delivery chat for traffic owned by `chat_id`; unbound chats get themselves.
    async fn resolve_destination_chat(&self, chat_id: &str) -> Result<String> {
        Ok(self
            .find_by_chat(chat_id)
            .await?
            .map(|account| account.destination().to_string())
            .unwrap_or_else(|| chat_id.to_string()))
    }

    /// Stores `account`, replacing any row that shares its owner or instance.
    async fn bind(&self, account: Account) -> Result<Account>;

    async fn unbind(&self, owner_chat_id: &str) -> Result<Option<Account>>;

    async fn set_destination(&self, owner_chat_id: &str, destination: Option<&str>) -> Result<bool>;

    async fn set_notifications(&self, owner_chat_id: &str, flags: NotificationFlags) -> Result<bool>;

    /// Drops the account bound to `instance_id`, whoever owns it.
    async fn unbind_instance(&self, instance_id: i64) -> Result<Option<Account>>;

    /// Partner token a chat registered with `/setpartnertoken`.
    async fn partner_token(&self, chat_id: &str) -> Result<Option<String>>;

    async fn set_partner_token(&self, chat_id: &str, token: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct SqlAccountRegistry {
    pool: AnyPool,
    kind: DbKind,
}

impl SqlAccountRegistry {
    pub fn new(pool: AnyPool, kind: DbKind) -> Self {
        Self { pool, kind }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl AccountRegistry for SqlAccountRegistry {
    async fn find_by_chat(&self, chat_id: &str) -> Result<Option<Account>> {
        Ok(db::get_account_by_chat(&self.pool, self.kind, chat_id).await?)
    }

    async fn find_by_instance(&self, instance_id: i64) -> Result<Option<Account>> {
        Ok(db::get_account_by_instance(&self.pool, self.kind, instance_id).await?)
    }

    async fn bind(&self, account: Account) -> Result<Account> {
        let replaced = db::replace_account(&self.pool, self.kind, &account).await?;
        for old in &replaced {
            tracing::info!(
                owner_chat_id = %old.owner_chat_id,
                instance_id = old.instance_id,
                "account unbound by rebind"
            );
        }
        tracing::info!(
            owner_chat_id = %account.owner_chat_id,
            instance_id = account.instance_id,
            token = %redact_token(&account.credential_token),
            "account bound"
        );
        Ok(account)
    }

    async fn unbind(&self, owner_chat_id: &str) -> Result<Option<Account>> {
        let removed = db::delete_account(&self.pool, self.kind, owner_chat_id).await?;
        if let Some(account) = removed.as_ref() {
            tracing::info!(owner_chat_id, instance_id = account.instance_id, "account unbound");
        }
        Ok(removed)
    }

    async fn set_destination(&self, owner_chat_id: &str, destination: Option<&str>) -> Result<bool> {
        Ok(db::update_destination(&self.pool, self.kind, owner_chat_id, destination).await?)
    }

    async fn set_notifications(&self, owner_chat_id: &str, flags: NotificationFlags) -> Result<bool> {
        Ok(db::update_notifications(&self.pool, self.kind, owner_chat_id, flags).await?)
    }

    async fn unbind_instance(&self, instance_id: i64) -> Result<Option<Account>> {
        let removed = db::delete_account_by_instance(&self.pool, self.kind, instance_id).await?;
        if let Some(account) = removed.as_ref() {
            tracing::info!(owner_chat_id = %account.owner_chat_id, instance_id, "account unbound");
        }
        Ok(removed)
    }

    async fn partner_token(&self, chat_id: &str) -> Result<Option<String>> {
        Ok(db::get_partner_token(&self.pool, self.kind, chat_id).await?)
    }

    async fn set_partner_token(&self, chat_id: &str, token: &str) -> Result<()> {
        db::upsert_partner_token(&self.pool, self.kind, chat_id, token).await?;
        tracing::info!(chat_id, token = %redact_token(token), "partner token saved");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    account: Account,
    stored_at: Instant,
}

/// Read-through cache over another registry.
///
/// Entries live at most `ttl`; every write made through the wrapper evicts
/// the affected owner and instance keys before it returns. A zero `ttl`
/// turns the cache off. A lookup that overlaps a write is returned but not
/// stored, so a row read before the write never outlives it in the cache.
pub struct CachedRegistry<R> {
    inner: R,
    ttl: Duration,
    by_chat: DashMap<String, CacheEntry>,
    by_instance: DashMap<i64, CacheEntry>,
    writes: AtomicU64,
}

impl<R: AccountRegistry> CachedRegistry<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            by_chat: DashMap::new(),
            by_instance: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn cached_len(&self) -> usize {
        self.by_chat.len()
    }

    fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    fn fresh(&self, entry: &CacheEntry) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }

    fn generation(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Marks a completed write; must run before the write's evictions.
    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Caches `account` unless a write finished since `generation` was read.
    fn store(&self, account: &Account, generation: u64) {
        if !self.enabled() || self.generation() != generation {
            return;
        }
        let entry = CacheEntry {
            account: account.clone(),
            stored_at: Instant::now(),
        };
        self.by_chat.insert(account.owner_chat_id.clone(), entry.clone());
        self.by_instance.insert(account.instance_id, entry);
        if self.generation() != generation {
            self.evict_owner(&account.owner_chat_id);
            self.evict_instance(account.instance_id);
        }
    }

    fn cached_by_chat(&self, chat_id: &str) -> Option<Account> {
        let hit = self.by_chat.get(chat_id).map(|entry| entry.value().clone());
        match hit {
            Some(entry) if self.fresh(&entry) => Some(entry.account),
            Some(_) => {
                self.by_chat.remove(chat_id);
                None
            }
            None => None,
        }
    }

    fn cached_by_instance(&self, instance_id: i64) -> Option<Account> {
        let hit = self
            .by_instance
            .get(&instance_id)
            .map(|entry| entry.value().clone());
        match hit {
            Some(entry) if self.fresh(&entry) => Some(entry.account),
            Some(_) => {
                self.by_instance.remove(&instance_id);
                None
            }
            None => None,
        }
    }

    fn evict_owner(&self, owner_chat_id: &str) {
        self.by_chat.remove(owner_chat_id);
        self.by_instance
            .retain(|_, entry| entry.account.owner_chat_id != owner_chat_id);
    }

    fn evict_instance(&self, instance_id: i64) {
        self.by_instance.remove(&instance_id);
        self.by_chat
            .retain(|_, entry| entry.account.instance_id != instance_id);
    }
}

#[async_trait]
impl<R: AccountRegistry> AccountRegistry for CachedRegistry<R> {
    async fn find_by_chat(&self, chat_id: &str) -> Result<Option<Account>> {
        if let Some(account) = self.cached_by_chat(chat_id) {
            return Ok(Some(account));
        }
        let generation = self.generation();
        let found = self.inner.find_by_chat(chat_id).await?;
        if let Some(account) = found.as_ref() {
            self.store(account, generation);
        }
        Ok(found)
    }

    async fn find_by_instance(&self, instance_id: i64) -> Result<Option<Account>> {
        if let Some(account) = self.cached_by_instance(instance_id) {
            return Ok(Some(account));
        }
        let generation = self.generation();
        let found = self.inner.find_by_instance(instance_id).await?;
        if let Some(account) = found.as_ref() {
            self.store(account, generation);
        }
        Ok(found)
    }

    async fn bind(&self, account: Account) -> Result<Account> {
        let result = self.inner.bind(account.clone()).await;
        self.record_write();
        self.evict_owner(&account.owner_chat_id);
        self.evict_instance(account.instance_id);
        result
    }

    async fn unbind(&self, owner_chat_id: &str) -> Result<Option<Account>> {
        let result = self.inner.unbind(owner_chat_id).await;
        self.record_write();
        self.evict_owner(owner_chat_id);
        if let Ok(Some(account)) = result.as_ref() {
            self.evict_instance(account.instance_id);
        }
        result
    }

    async fn set_destination(&self, owner_chat_id: &str, destination: Option<&str>) -> Result<bool> {
        let result = self.inner.set_destination(owner_chat_id, destination).await;
        self.record_write();
        self.evict_owner(owner_chat_id);
        result
    }

    async fn set_notifications(&self, owner_chat_id: &str, flags: NotificationFlags) -> Result<bool> {
        let result = self.inner.set_notifications(owner_chat_id, flags).await;
        self.record_write();
        self.evict_owner(owner_chat_id);
        result
    }

    async fn unbind_instance(&self, instance_id: i64) -> Result<Option<Account>> {
        let result = self.inner.unbind_instance(instance_id).await;
        self.record_write();
        self.evict_instance(instance_id);
        if let Ok(Some(account)) = result.as_ref() {
            self.evict_owner(&account.owner_chat_id);
        }
        result
    }

    async fn partner_token(&self, chat_id: &str) -> Result<Option<String>> {
        self.inner.partner_token(chat_id).await
    }

    async fn set_partner_token(&self, chat_id: &str, token: &str) -> Result<()> {
        self.inner.set_partner_token(chat_id, token).await
    }
}
