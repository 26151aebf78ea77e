//! Storage seams for the marketplace.
//!
//! Each entity family sits behind its own trait so services never know
//! which backend they talk to:
//!
//! - [`SessionStore`] - session tokens
//! - [`AccountStore`] - buyers and sellers
//! - [`CatalogStore`] - products (the document store)
//! - [`CartStore`] - carts and cart items
//! - [`TransactionStore`] - the append-only purchase ledger
//!
//! Two backends implement every trait: [`MemoryStore`] for development and
//! tests, and [`PgStore`] on `PostgreSQL`.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! mkt migrate
//! ```

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use marketplace_core::{
    AccountId, BuyerId, CartId, Category, Keywords, Price, ProductId, Rating, SellerId,
    SessionToken,
};

use crate::models::{Buyer, Cart, CartItem, NewAccount, Product, Seller, Session, Transaction};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate username).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The backend refused the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of removing units of a product from sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleRemoval {
    /// Stock was reduced; the product stays listed.
    Reduced(Product),
    /// Stock reached zero and the product was deleted.
    Deleted,
}

// =============================================================================
// Store Traits
// =============================================================================

/// Session token storage. Every call is atomic per token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Cheap round-trip used by readiness checks.
    async fn ping(&self) -> Result<(), RepositoryError>;

    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn get_session(&self, token: &SessionToken) -> Result<Option<Session>, RepositoryError>;

    /// Returns whether a session was removed.
    async fn delete_session(&self, token: &SessionToken) -> Result<bool, RepositoryError>;

    async fn delete_sessions_for(&self, user_id: AccountId) -> Result<u64, RepositoryError>;

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Buyer and seller accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `Conflict` if the username is taken.
    async fn create_buyer(&self, account: NewAccount) -> Result<Buyer, RepositoryError>;

    /// Fails with `Conflict` if the username is taken.
    async fn create_seller(&self, account: NewAccount) -> Result<Seller, RepositoryError>;

    async fn get_buyer(&self, id: BuyerId) -> Result<Option<Buyer>, RepositoryError>;

    async fn get_seller(&self, id: SellerId) -> Result<Option<Seller>, RepositoryError>;

    /// Buyer and stored password hash for a username.
    async fn buyer_password_hash(
        &self,
        username: &str,
    ) -> Result<Option<(Buyer, String)>, RepositoryError>;

    /// Seller and stored password hash for a username.
    async fn seller_password_hash(
        &self,
        username: &str,
    ) -> Result<Option<(Seller, String)>, RepositoryError>;

    /// Atomically bump one rating counter. Fails with `NotFound` for an unknown seller.
    async fn record_seller_feedback(
        &self,
        id: SellerId,
        liked: bool,
    ) -> Result<Rating, RepositoryError>;

    async fn add_items_sold(&self, id: SellerId, count: u32) -> Result<(), RepositoryError>;

    async fn add_items_purchased(&self, id: BuyerId, count: u32) -> Result<(), RepositoryError>;

    async fn delete_buyer(&self, id: BuyerId) -> Result<bool, RepositoryError>;

    async fn delete_seller(&self, id: SellerId) -> Result<bool, RepositoryError>;
}

/// Product catalog (document store).
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_product(&self, product: &Product) -> Result<(), RepositoryError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Fails with `NotFound` for an unknown product.
    async fn update_price(&self, id: ProductId, price: Price) -> Result<Product, RepositoryError>;

    async fn products_by_seller(&self, seller: SellerId) -> Result<Vec<Product>, RepositoryError>;

    /// Products in `category` with stock left that share a keyword with
    /// `keywords` (or all of them when `keywords` is empty).
    async fn search_products(
        &self,
        category: Category,
        keywords: &Keywords,
    ) -> Result<Vec<Product>, RepositoryError>;

    /// Take `quantity` units out of stock if at least that many remain.
    ///
    /// Returns `false`, leaving stock untouched, when there are not enough.
    /// Fails with `NotFound` for an unknown product.
    async fn reserve_stock(&self, id: ProductId, quantity: u32) -> Result<bool, RepositoryError>;

    /// Put `quantity` units back into stock.
    async fn restock(&self, id: ProductId, quantity: u32) -> Result<(), RepositoryError>;

    /// Reduce stock by up to `quantity`, deleting the product when nothing
    /// remains. Cart items for a deleted product are removed as well.
    async fn remove_from_sale(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<SaleRemoval, RepositoryError>;

    /// Atomically bump one rating counter. Fails with `NotFound` for an unknown product.
    async fn record_product_feedback(
        &self,
        id: ProductId,
        liked: bool,
    ) -> Result<Rating, RepositoryError>;

    /// Delete every product a seller owns, with their cart items.
    async fn delete_products_by_seller(&self, seller: SellerId) -> Result<u64, RepositoryError>;
}

/// Carts and their items.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn cart_for_buyer(&self, buyer: BuyerId) -> Result<Option<Cart>, RepositoryError>;

    /// Return the buyer's cart, creating it if none exists.
    async fn get_or_create_cart(&self, buyer: BuyerId) -> Result<Cart, RepositoryError>;

    async fn get_item(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<Option<CartItem>, RepositoryError>;

    async fn upsert_item(&self, item: &CartItem) -> Result<(), RepositoryError>;

    async fn delete_item(&self, cart: CartId, product: ProductId) -> Result<bool, RepositoryError>;

    async fn items(&self, cart: CartId) -> Result<Vec<CartItem>, RepositoryError>;

    async fn clear_items(&self, cart: CartId) -> Result<u64, RepositoryError>;

    async fn set_saved(&self, cart: CartId, saved: bool) -> Result<Cart, RepositoryError>;

    /// Delete a buyer's cart and its items.
    async fn delete_cart_for_buyer(&self, buyer: BuyerId) -> Result<bool, RepositoryError>;
}

/// Append-only purchase ledger.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), RepositoryError>;

    async fn transactions_by_cart(&self, cart: CartId)
    -> Result<Vec<Transaction>, RepositoryError>;

    async fn transactions_by_buyer(
        &self,
        buyer: BuyerId,
    ) -> Result<Vec<Transaction>, RepositoryError>;

    async fn transactions_by_seller(
        &self,
        seller: SellerId,
    ) -> Result<Vec<Transaction>, RepositoryError>;

    async fn has_purchased(
        &self,
        buyer: BuyerId,
        product: ProductId,
    ) -> Result<bool, RepositoryError>;

    async fn delete_transactions_by_cart(&self, cart: CartId) -> Result<u64, RepositoryError>;

    async fn delete_transactions_by_buyer(&self, buyer: BuyerId) -> Result<u64, RepositoryError>;

    async fn delete_transactions_by_seller(&self, seller: SellerId)
    -> Result<u64, RepositoryError>;
}

// =============================================================================
// Store Bundle
// =============================================================================

/// Handles to every store, shared by the services.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub carts: Arc<dyn CartStore>,
    pub transactions: Arc<dyn TransactionStore>,
}

impl Stores {
    /// Use one backend for every entity family.
    #[must_use]
    pub fn single<S>(store: Arc<S>) -> Self
    where
        S: SessionStore + AccountStore + CatalogStore + CartStore + TransactionStore + 'static,
    {
        Self {
            sessions: store.clone(),
            accounts: store.clone(),
            catalog: store.clone(),
            carts: store.clone(),
            transactions: store,
        }
    }

    /// Fresh in-memory stores.
    #[must_use]
    pub fn memory() -> Self {
        Self::single(Arc::new(MemoryStore::new()))
    }

    /// `PostgreSQL`-backed stores.
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        Self::single(Arc::new(PgStore::new(pool)))
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Run the embedded migrations against `pool`.
///
/// # Errors
///
/// Returns `MigrateError` if any migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
