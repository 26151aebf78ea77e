//! In-memory store for development and tests.
//!
//! Every map is a `DashMap`, so single-key operations (stock reservation,
//! rating bumps, session lookups) run under one shard lock and are atomic.
//! The ledger is a plain vector behind a `parking_lot` lock.
//!
//! Two switches simulate outages: [`MemoryStore::set_available`] fails every
//! call, and [`MemoryStore::fail_operation`] fails one named operation.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;

use marketplace_core::{
    AccountId, BuyerId, CartId, Category, Keywords, Price, ProductId, Rating, SellerId,
    SessionToken,
};

use super::{
    AccountStore, CartStore, CatalogStore, RepositoryError, SaleRemoval, SessionStore,
    TransactionStore,
};
use crate::models::{Buyer, Cart, CartItem, NewAccount, Product, Seller, Session, Transaction};

#[derive(Debug, Clone)]
struct Credentialed<T> {
    account: T,
    password_hash: String,
}

/// Thread-safe in-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    buyers: DashMap<BuyerId, Credentialed<Buyer>>,
    buyer_usernames: DashMap<String, BuyerId>,
    sellers: DashMap<SellerId, Credentialed<Seller>>,
    seller_usernames: DashMap<String, SellerId>,
    products: DashMap<ProductId, Product>,
    carts: DashMap<CartId, Cart>,
    cart_by_buyer: DashMap<BuyerId, CartId>,
    cart_items: DashMap<(CartId, ProductId), CartItem>,
    transactions: RwLock<Vec<Transaction>>,
    unavailable: AtomicBool,
    failing: DashSet<&'static str>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail (or succeed again) with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make one operation, named after its trait method, fail with `Unavailable`.
    pub fn fail_operation(&self, operation: &'static str) {
        self.failing.insert(operation);
    }

    /// Undo [`MemoryStore::fail_operation`].
    pub fn restore_operation(&self, operation: &'static str) {
        self.failing.remove(operation);
    }

    fn check(&self, operation: &'static str) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) || self.failing.contains(operation) {
            return Err(RepositoryError::Unavailable(format!(
                "{operation} refused by in-memory store"
            )));
        }
        Ok(())
    }

    fn drop_cart_items_for_product(&self, product: ProductId) {
        self.cart_items.retain(|(_, p), _| *p != product);
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[async_trait]
impl SessionStore for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check("ping")
    }

    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        self.check("insert_session")?;
        self.sessions
            .insert(session.token.as_str().to_owned(), session.clone());
        Ok(())
    }

    async fn get_session(&self, token: &SessionToken) -> Result<Option<Session>, RepositoryError> {
        self.check("get_session")?;
        Ok(self.sessions.get(token.as_str()).map(|s| s.clone()))
    }

    async fn delete_session(&self, token: &SessionToken) -> Result<bool, RepositoryError> {
        self.check("delete_session")?;
        Ok(self.sessions.remove(token.as_str()).is_some())
    }

    async fn delete_sessions_for(&self, user_id: AccountId) -> Result<u64, RepositoryError> {
        self.check("delete_sessions_for")?;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.user_id != user_id);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.check("delete_expired_sessions")?;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }
}

// =============================================================================
// Accounts
// =============================================================================

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_buyer(&self, account: NewAccount) -> Result<Buyer, RepositoryError> {
        self.check("create_buyer")?;
        let Entry::Vacant(slot) = self.buyer_usernames.entry(account.username.clone()) else {
            return Err(RepositoryError::Conflict("username already exists".to_owned()));
        };

        let buyer = Buyer {
            id: BuyerId::new(),
            name: account.name,
            username: account.username,
            items_purchased: 0,
            created_at: Utc::now(),
        };
        slot.insert(buyer.id);
        self.buyers.insert(
            buyer.id,
            Credentialed {
                account: buyer.clone(),
                password_hash: account.password_hash,
            },
        );
        Ok(buyer)
    }

    async fn create_seller(&self, account: NewAccount) -> Result<Seller, RepositoryError> {
        self.check("create_seller")?;
        let Entry::Vacant(slot) = self.seller_usernames.entry(account.username.clone()) else {
            return Err(RepositoryError::Conflict("username already exists".to_owned()));
        };

        let seller = Seller {
            id: SellerId::new(),
            name: account.name,
            username: account.username,
            rating: Rating::default(),
            items_sold: 0,
            created_at: Utc::now(),
        };
        slot.insert(seller.id);
        self.sellers.insert(
            seller.id,
            Credentialed {
                account: seller.clone(),
                password_hash: account.password_hash,
            },
        );
        Ok(seller)
    }

    async fn get_buyer(&self, id: BuyerId) -> Result<Option<Buyer>, RepositoryError> {
        self.check("get_buyer")?;
        Ok(self.buyers.get(&id).map(|b| b.account.clone()))
    }

    async fn get_seller(&self, id: SellerId) -> Result<Option<Seller>, RepositoryError> {
        self.check("get_seller")?;
        Ok(self.sellers.get(&id).map(|s| s.account.clone()))
    }

    async fn buyer_password_hash(
        &self,
        username: &str,
    ) -> Result<Option<(Buyer, String)>, RepositoryError> {
        self.check("buyer_password_hash")?;
        let Some(id) = self.buyer_usernames.get(username).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self
            .buyers
            .get(&id)
            .map(|b| (b.account.clone(), b.password_hash.clone())))
    }

    async fn seller_password_hash(
        &self,
        username: &str,
    ) -> Result<Option<(Seller, String)>, RepositoryError> {
        self.check("seller_password_hash")?;
        let Some(id) = self.seller_usernames.get(username).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self
            .sellers
            .get(&id)
            .map(|s| (s.account.clone(), s.password_hash.clone())))
    }

    async fn record_seller_feedback(
        &self,
        id: SellerId,
        liked: bool,
    ) -> Result<Rating, RepositoryError> {
        self.check("record_seller_feedback")?;
        let mut seller = self.sellers.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        seller.account.rating = seller.account.rating.with_feedback(liked);
        Ok(seller.account.rating)
    }

    async fn add_items_sold(&self, id: SellerId, count: u32) -> Result<(), RepositoryError> {
        self.check("add_items_sold")?;
        let mut seller = self.sellers.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        seller.account.items_sold = seller.account.items_sold.saturating_add(count);
        Ok(())
    }

    async fn add_items_purchased(&self, id: BuyerId, count: u32) -> Result<(), RepositoryError> {
        self.check("add_items_purchased")?;
        let mut buyer = self.buyers.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        buyer.account.items_purchased = buyer.account.items_purchased.saturating_add(count);
        Ok(())
    }

    async fn delete_buyer(&self, id: BuyerId) -> Result<bool, RepositoryError> {
        self.check("delete_buyer")?;
        let Some((_, removed)) = self.buyers.remove(&id) else {
            return Ok(false);
        };
        self.buyer_usernames.remove(&removed.account.username);
        Ok(true)
    }

    async fn delete_seller(&self, id: SellerId) -> Result<bool, RepositoryError> {
        self.check("delete_seller")?;
        let Some((_, removed)) = self.sellers.remove(&id) else {
            return Ok(false);
        };
        self.seller_usernames.remove(&removed.account.username);
        Ok(true)
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<(), RepositoryError> {
        self.check("insert_product")?;
        self.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        self.check("get_product")?;
        Ok(self.products.get(&id).map(|p| p.clone()))
    }

    async fn update_price(&self, id: ProductId, price: Price) -> Result<Product, RepositoryError> {
        self.check("update_price")?;
        let mut product = self.products.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        product.sale_price = price;
        Ok(product.clone())
    }

    async fn products_by_seller(&self, seller: SellerId) -> Result<Vec<Product>, RepositoryError> {
        self.check("products_by_seller")?;
        let mut products: Vec<Product> = self
            .products
            .iter()
            .filter(|p| p.seller_id == seller)
            .map(|p| p.clone())
            .collect();
        products.sort_by_key(|p| p.created_at);
        Ok(products)
    }

    async fn search_products(
        &self,
        category: Category,
        keywords: &Keywords,
    ) -> Result<Vec<Product>, RepositoryError> {
        self.check("search_products")?;
        let mut products: Vec<Product> = self
            .products
            .iter()
            .filter(|p| p.quantity > 0 && p.matches(category, keywords))
            .map(|p| p.clone())
            .collect();
        products.sort_by_key(|p| p.created_at);
        Ok(products)
    }

    async fn reserve_stock(&self, id: ProductId, quantity: u32) -> Result<bool, RepositoryError> {
        self.check("reserve_stock")?;
        let mut product = self.products.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if product.quantity < quantity {
            return Ok(false);
        }
        product.quantity -= quantity;
        Ok(true)
    }

    async fn restock(&self, id: ProductId, quantity: u32) -> Result<(), RepositoryError> {
        self.check("restock")?;
        let mut product = self.products.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        product.quantity = product.quantity.saturating_add(quantity);
        Ok(())
    }

    async fn remove_from_sale(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<SaleRemoval, RepositoryError> {
        self.check("remove_from_sale")?;
        let Entry::Occupied(mut entry) = self.products.entry(id) else {
            return Err(RepositoryError::NotFound);
        };

        let product = entry.get_mut();
        product.quantity = product.quantity.saturating_sub(quantity);
        if product.quantity > 0 {
            return Ok(SaleRemoval::Reduced(product.clone()));
        }

        entry.remove();
        self.drop_cart_items_for_product(id);
        Ok(SaleRemoval::Deleted)
    }

    async fn record_product_feedback(
        &self,
        id: ProductId,
        liked: bool,
    ) -> Result<Rating, RepositoryError> {
        self.check("record_product_feedback")?;
        let mut product = self.products.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        product.rating = product.rating.with_feedback(liked);
        Ok(product.rating)
    }

    async fn delete_products_by_seller(&self, seller: SellerId) -> Result<u64, RepositoryError> {
        self.check("delete_products_by_seller")?;
        let owned: Vec<ProductId> = self
            .products
            .iter()
            .filter(|p| p.seller_id == seller)
            .map(|p| p.id)
            .collect();

        for id in &owned {
            self.products.remove(id);
            self.drop_cart_items_for_product(*id);
        }
        Ok(owned.len() as u64)
    }
}

// =============================================================================
// Carts
// =============================================================================

#[async_trait]
impl CartStore for MemoryStore {
    async fn cart_for_buyer(&self, buyer: BuyerId) -> Result<Option<Cart>, RepositoryError> {
        self.check("cart_for_buyer")?;
        let Some(cart_id) = self.cart_by_buyer.get(&buyer).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.carts.get(&cart_id).map(|c| c.clone()))
    }

    async fn get_or_create_cart(&self, buyer: BuyerId) -> Result<Cart, RepositoryError> {
        self.check("get_or_create_cart")?;
        let cart_id = match self.cart_by_buyer.entry(buyer) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(slot) => {
                let cart = Cart::new(buyer);
                let id = cart.id;
                self.carts.insert(id, cart);
                slot.insert(id);
                id
            }
        };
        self.carts
            .get(&cart_id)
            .map(|c| c.clone())
            .ok_or_else(|| RepositoryError::DataCorruption(format!("cart {cart_id} has no record")))
    }

    async fn get_item(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<Option<CartItem>, RepositoryError> {
        self.check("get_item")?;
        Ok(self.cart_items.get(&(cart, product)).map(|i| i.clone()))
    }

    async fn upsert_item(&self, item: &CartItem) -> Result<(), RepositoryError> {
        self.check("upsert_item")?;
        // The product shard stays read-locked until the line is in, so a
        // concurrent delete either sees the line or runs before the check.
        let _product = self
            .products
            .get(&item.product_id)
            .ok_or(RepositoryError::NotFound)?;
        self.cart_items
            .insert((item.cart_id, item.product_id), item.clone());
        if let Some(mut cart) = self.carts.get_mut(&item.cart_id) {
            cart.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_item(&self, cart: CartId, product: ProductId) -> Result<bool, RepositoryError> {
        self.check("delete_item")?;
        Ok(self.cart_items.remove(&(cart, product)).is_some())
    }

    async fn items(&self, cart: CartId) -> Result<Vec<CartItem>, RepositoryError> {
        self.check("items")?;
        Ok(self
            .cart_items
            .iter()
            .filter(|i| i.cart_id == cart)
            .map(|i| i.clone())
            .collect())
    }

    async fn clear_items(&self, cart: CartId) -> Result<u64, RepositoryError> {
        self.check("clear_items")?;
        let before = self.cart_items.len();
        self.cart_items.retain(|(c, _), _| *c != cart);
        Ok(before.saturating_sub(self.cart_items.len()) as u64)
    }

    async fn set_saved(&self, cart: CartId, saved: bool) -> Result<Cart, RepositoryError> {
        self.check("set_saved")?;
        let mut record = self.carts.get_mut(&cart).ok_or(RepositoryError::NotFound)?;
        record.saved = saved;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete_cart_for_buyer(&self, buyer: BuyerId) -> Result<bool, RepositoryError> {
        self.check("delete_cart_for_buyer")?;
        let Some((_, cart_id)) = self.cart_by_buyer.remove(&buyer) else {
            return Ok(false);
        };
        self.carts.remove(&cart_id);
        self.cart_items.retain(|(c, _), _| *c != cart_id);
        Ok(true)
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), RepositoryError> {
        self.check("insert_transaction")?;
        self.transactions.write().push(transaction.clone());
        Ok(())
    }

    async fn transactions_by_cart(
        &self,
        cart: CartId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        self.check("transactions_by_cart")?;
        Ok(self
            .transactions
            .read()
            .iter()
            .filter(|t| t.cart_id == cart)
            .cloned()
            .collect())
    }

    async fn transactions_by_buyer(
        &self,
        buyer: BuyerId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        self.check("transactions_by_buyer")?;
        Ok(self
            .transactions
            .read()
            .iter()
            .filter(|t| t.buyer_id == buyer)
            .cloned()
            .collect())
    }

    async fn transactions_by_seller(
        &self,
        seller: SellerId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        self.check("transactions_by_seller")?;
        Ok(self
            .transactions
            .read()
            .iter()
            .filter(|t| t.seller_id == seller)
            .cloned()
            .collect())
    }

    async fn has_purchased(
        &self,
        buyer: BuyerId,
        product: ProductId,
    ) -> Result<bool, RepositoryError> {
        self.check("has_purchased")?;
        Ok(self
            .transactions
            .read()
            .iter()
            .any(|t| t.buyer_id == buyer && t.product_id == product))
    }

    async fn delete_transactions_by_cart(&self, cart: CartId) -> Result<u64, RepositoryError> {
        self.check("delete_transactions_by_cart")?;
        Ok(retain_counting(&self.transactions, |t| t.cart_id != cart))
    }

    async fn delete_transactions_by_buyer(&self, buyer: BuyerId) -> Result<u64, RepositoryError> {
        self.check("delete_transactions_by_buyer")?;
        Ok(retain_counting(&self.transactions, |t| t.buyer_id != buyer))
    }

    async fn delete_transactions_by_seller(
        &self,
        seller: SellerId,
    ) -> Result<u64, RepositoryError> {
        self.check("delete_transactions_by_seller")?;
        Ok(retain_counting(&self.transactions, |t| t.seller_id != seller))
    }
}

/// Retain matching transactions and report how many were dropped.
fn retain_counting(
    transactions: &RwLock<Vec<Transaction>>,
    keep: impl Fn(&Transaction) -> bool,
) -> u64 {
    let mut transactions = transactions.write();
    let before = transactions.len();
    transactions.retain(|t| keep(t));
    before.saturating_sub(transactions.len()) as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use marketplace_core::Condition;

    fn product(seller_id: SellerId, quantity: u32) -> Product {
        Product {
            id: ProductId::new(),
            name: "Lamp".to_owned(),
            category: Category::One,
            keywords: Keywords::parse(["lamp"]).unwrap(),
            condition: Condition::Used,
            sale_price: "12.00".parse().unwrap(),
            seller_id,
            quantity,
            rating: Rating::default(),
            created_at: Utc::now(),
        }
    }

    fn account(username: &str) -> NewAccount {
        NewAccount {
            name: "Test".to_owned(),
            username: username.to_owned(),
            password_hash: "hash".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        store.create_buyer(account("ada")).await.unwrap();
        let result = store.create_buyer(account("ada")).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        // Sellers have their own namespace.
        assert!(store.create_seller(account("ada")).await.is_ok());
    }

    #[tokio::test]
    async fn test_reserve_stock_is_conditional() {
        let store = MemoryStore::new();
        let p = product(SellerId::new(), 5);
        store.insert_product(&p).await.unwrap();

        assert!(store.reserve_stock(p.id, 3).await.unwrap());
        assert!(!store.reserve_stock(p.id, 3).await.unwrap());
        assert_eq!(store.get_product(p.id).await.unwrap().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_remove_from_sale_deletes_at_zero_and_cascades() {
        let store = MemoryStore::new();
        let p = product(SellerId::new(), 2);
        store.insert_product(&p).await.unwrap();
        let cart = store.get_or_create_cart(BuyerId::new()).await.unwrap();
        store
            .upsert_item(&CartItem {
                cart_id: cart.id,
                product_id: p.id,
                seller_id: p.seller_id,
                quantity: 1,
                price: p.sale_price,
            })
            .await
            .unwrap();

        let first = store.remove_from_sale(p.id, 1).await.unwrap();
        assert!(matches!(first, SaleRemoval::Reduced(ref left) if left.quantity == 1));

        let second = store.remove_from_sale(p.id, 5).await.unwrap();
        assert_eq!(second, SaleRemoval::Deleted);
        assert!(store.get_product(p.id).await.unwrap().is_none());
        assert!(store.items(cart.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_item_requires_product() {
        let store = MemoryStore::new();
        let p = product(SellerId::new(), 2);
        let cart = store.get_or_create_cart(BuyerId::new()).await.unwrap();
        let line = CartItem {
            cart_id: cart.id,
            product_id: p.id,
            seller_id: p.seller_id,
            quantity: 1,
            price: p.sale_price,
        };

        let result = store.upsert_item(&line).await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
        assert!(store.items(cart.id).await.unwrap().is_empty());

        store.insert_product(&p).await.unwrap();
        store.upsert_item(&line).await.unwrap();
        assert_eq!(store.items(cart.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_cart_is_stable() {
        let store = MemoryStore::new();
        let buyer = BuyerId::new();
        let first = store.get_or_create_cart(buyer).await.unwrap();
        let second = store.get_or_create_cart(buyer).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_search_skips_sold_out() {
        let store = MemoryStore::new();
        let seller = SellerId::new();
        let listed = product(seller, 1);
        let sold_out = product(seller, 0);
        store.insert_product(&listed).await.unwrap();
        store.insert_product(&sold_out).await.unwrap();

        let found = store
            .search_products(Category::One, &Keywords::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, listed.id);
    }

    #[tokio::test]
    async fn test_unavailable_switches() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.ping().await,
            Err(RepositoryError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.ping().await.is_ok());

        store.fail_operation("get_product");
        assert!(store.get_product(ProductId::new()).await.is_err());
        store.restore_operation("get_product");
        assert!(store.get_product(ProductId::new()).await.unwrap().is_none());
    }
}
