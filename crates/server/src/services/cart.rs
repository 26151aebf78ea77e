//! Inventory and cart engine.
//!
//! Maintains the buyer's cart against current stock. Adding checks the
//! merged line quantity against the product's stock but never takes stock;
//! only checkout does that.
//!
//! Every read-modify-write on one buyer's cart runs under that buyer's
//! mutex. Different buyers never share a lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use marketplace_core::{BuyerId, Price, ProductId};

use crate::db::{CartStore, CatalogStore, RepositoryError};
use crate::error::{AppError, Result, StoreContext};
use crate::models::{Cart, CartItem, CartView, cart_total};

type LockMap = Arc<DashMap<BuyerId, Arc<Mutex<()>>>>;

/// Per-buyer cart operations.
#[derive(Clone)]
pub struct CartEngine {
    carts: Arc<dyn CartStore>,
    catalog: Arc<dyn CatalogStore>,
    locks: LockMap,
}

/// A held cart lock.
///
/// Dropping it releases the mutex, then removes the buyer's map entry if
/// nobody else holds or waits on it.
pub struct CartLock {
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
    buyer: BuyerId,
}

impl Drop for CartLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.buyer, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl CartEngine {
    #[must_use]
    pub fn new(carts: Arc<dyn CartStore>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            carts,
            catalog,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Take the buyer's cart lock.
    ///
    /// Held across an entire read-modify-write. Checkout holds it too.
    pub async fn lock(&self, buyer: BuyerId) -> CartLock {
        let mutex = self
            .locks
            .entry(buyer)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        CartLock {
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.locks),
            buyer,
        }
    }

    /// Add `quantity` units of a product, merging with an existing line.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `quantity` is zero, or the line price or cart
    ///   total would overflow
    /// - `NotFound` if the product does not exist
    /// - `InsufficientStock` if the merged quantity exceeds stock; the
    ///   existing line is left untouched
    #[tracing::instrument(skip(self), fields(buyer_id = %buyer, product_id = %product_id))]
    pub async fn add(&self, buyer: BuyerId, product_id: ProductId, quantity: u32) -> Result<CartItem> {
        require_positive(quantity)?;
        let _guard = self.lock(buyer).await;

        let cart = self
            .carts
            .get_or_create_cart(buyer)
            .await
            .store_context("cart", "load")?;
        let product = self
            .catalog
            .get_product(product_id)
            .await
            .store_context("product", "load")?
            .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;
        let existing = self
            .carts
            .get_item(cart.id, product_id)
            .await
            .store_context("cart item", "load")?;

        let held = existing.as_ref().map_or(0, |item| item.quantity);
        let total = held
            .checked_add(quantity)
            .filter(|total| *total <= product.quantity)
            .ok_or(AppError::InsufficientStock {
                product_id,
                requested: held.saturating_add(quantity),
                available: product.quantity,
            })?;

        let item = CartItem {
            cart_id: cart.id,
            product_id,
            seller_id: product.seller_id,
            quantity: total,
            price: line_price(product.sale_price, total)?,
        };
        let mut lines = self
            .carts
            .items(cart.id)
            .await
            .store_context("cart item", "list")?;
        lines.retain(|line| line.product_id != product_id);
        lines.push(item.clone());
        if cart_total(&lines).is_none() {
            return Err(AppError::InvalidArgument("cart total is too large".to_string()));
        }

        self.carts
            .upsert_item(&item)
            .await
            .map_err(|err| match err {
                // The product was deleted after it was loaded.
                RepositoryError::NotFound => AppError::NotFound("Product not found".to_string()),
                source => AppError::store("cart item", "update", source),
            })?;

        tracing::debug!(quantity = total, "Cart line updated");
        Ok(item)
    }

    /// Remove `quantity` units of a product from the cart.
    ///
    /// Removing at least the held quantity deletes the line and returns
    /// `None`. Otherwise the line price is recomputed from the current sale
    /// price. Stock is never touched.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `quantity` is zero
    /// - `NotFound` if there is no cart, no such line, or (for a partial
    ///   removal) the product is gone
    #[tracing::instrument(skip(self), fields(buyer_id = %buyer, product_id = %product_id))]
    pub async fn remove(
        &self,
        buyer: BuyerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Option<CartItem>> {
        require_positive(quantity)?;
        let _guard = self.lock(buyer).await;

        let cart = self.existing_cart(buyer).await?;
        let item = self
            .carts
            .get_item(cart.id, product_id)
            .await
            .store_context("cart item", "load")?
            .ok_or_else(|| AppError::NotFound("Product is not in the cart".to_string()))?;

        if quantity >= item.quantity {
            self.carts
                .delete_item(cart.id, product_id)
                .await
                .store_context("cart item", "delete")?;
            tracing::debug!("Cart line removed");
            return Ok(None);
        }

        let product = self
            .catalog
            .get_product(product_id)
            .await
            .store_context("product", "load")?
            .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;
        let remaining = item.quantity - quantity;
        let item = CartItem {
            quantity: remaining,
            price: line_price(product.sale_price, remaining)?,
            ..item
        };
        self.carts
            .upsert_item(&item)
            .await
            .store_context("cart item", "update")?;

        tracing::debug!(quantity = remaining, "Cart line reduced");
        Ok(Some(item))
    }

    /// Mark the buyer's cart as saved.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the buyer has no cart.
    pub async fn save(&self, buyer: BuyerId) -> Result<Cart> {
        let _guard = self.lock(buyer).await;
        let cart = self.existing_cart(buyer).await?;
        self.carts
            .set_saved(cart.id, true)
            .await
            .store_context("cart", "save")
    }

    /// Delete every line but keep the cart.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the buyer has no cart.
    pub async fn clear(&self, buyer: BuyerId) -> Result<u64> {
        let _guard = self.lock(buyer).await;
        let cart = self.existing_cart(buyer).await?;
        self.carts
            .clear_items(cart.id)
            .await
            .store_context("cart", "clear")
    }

    /// The buyer's cart with its lines and total.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the buyer has no cart.
    pub async fn view(&self, buyer: BuyerId) -> Result<CartView> {
        let _guard = self.lock(buyer).await;
        let cart = self.existing_cart(buyer).await?;
        let items = self
            .carts
            .items(cart.id)
            .await
            .store_context("cart item", "list")?;
        CartView::new(cart, items)
            .ok_or_else(|| AppError::InvalidArgument("cart total is too large".to_string()))
    }

    async fn existing_cart(&self, buyer: BuyerId) -> Result<Cart> {
        self.carts
            .cart_for_buyer(buyer)
            .await
            .store_context("cart", "load")?
            .ok_or_else(|| AppError::NotFound("Cart not found".to_string()))
    }
}

fn line_price(unit: Price, quantity: u32) -> Result<Price> {
    unit.times(quantity)
        .ok_or_else(|| AppError::InvalidArgument("line price is too large".to_string()))
}

fn require_positive(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(AppError::InvalidArgument(
            "quantity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, SaleRemoval};
    use crate::models::Product;
    use async_trait::async_trait;
    use chrono::Utc;
    use marketplace_core::{Category, Condition, Keywords, Rating, SellerId};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    const HUGE_PRICE: &str = "50000000000000000000000000000";

    fn lamp(sale_price: Price, stock: u32) -> Product {
        Product {
            id: ProductId::new(),
            name: "Lamp".to_string(),
            category: Category::One,
            keywords: Keywords::parse(["lamp"]).unwrap(),
            condition: Condition::New,
            sale_price,
            seller_id: SellerId::new(),
            quantity: stock,
            rating: Rating::default(),
            created_at: Utc::now(),
        }
    }

    async fn setup(stock: u32) -> (Arc<MemoryStore>, CartEngine, Product) {
        let store = Arc::new(MemoryStore::new());
        let engine = CartEngine::new(store.clone(), store.clone());
        let product = lamp(Price::parse(Decimal::new(100, 1)).unwrap(), stock);
        store.insert_product(&product).await.unwrap();
        (store, engine, product)
    }

    type StoreResult<T> = std::result::Result<T, RepositoryError>;

    /// Catalog whose products disappear right after they are loaded.
    struct VanishingCatalog(Arc<MemoryStore>);

    #[async_trait]
    impl CatalogStore for VanishingCatalog {
        async fn insert_product(&self, product: &Product) -> StoreResult<()> {
            self.0.insert_product(product).await
        }

        async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>> {
            let product = self.0.get_product(id).await?;
            if let Some(product) = &product {
                self.0.remove_from_sale(id, product.quantity).await?;
            }
            Ok(product)
        }

        async fn update_price(&self, id: ProductId, price: Price) -> StoreResult<Product> {
            self.0.update_price(id, price).await
        }

        async fn products_by_seller(&self, seller: SellerId) -> StoreResult<Vec<Product>> {
            self.0.products_by_seller(seller).await
        }

        async fn search_products(
            &self,
            category: Category,
            keywords: &Keywords,
        ) -> StoreResult<Vec<Product>> {
            self.0.search_products(category, keywords).await
        }

        async fn reserve_stock(&self, id: ProductId, quantity: u32) -> StoreResult<bool> {
            self.0.reserve_stock(id, quantity).await
        }

        async fn restock(&self, id: ProductId, quantity: u32) -> StoreResult<()> {
            self.0.restock(id, quantity).await
        }

        async fn remove_from_sale(
            &self,
            id: ProductId,
            quantity: u32,
        ) -> StoreResult<SaleRemoval> {
            self.0.remove_from_sale(id, quantity).await
        }

        async fn record_product_feedback(
            &self,
            id: ProductId,
            liked: bool,
        ) -> StoreResult<Rating> {
            self.0.record_product_feedback(id, liked).await
        }

        async fn delete_products_by_seller(&self, seller: SellerId) -> StoreResult<u64> {
            self.0.delete_products_by_seller(seller).await
        }
    }

    #[tokio::test]
    async fn test_add_prices_line_from_sale_price() {
        let (_, engine, product) = setup(5).await;
        let buyer = BuyerId::new();

        let item = engine.add(buyer, product.id, 3).await.unwrap();

        assert_eq!(item.quantity, 3);
        assert_eq!(item.price.amount(), Decimal::new(300, 1));
        assert_eq!(item.seller_id, product.seller_id);
    }

    #[tokio::test]
    async fn test_add_over_stock_leaves_line_unchanged() {
        let (_, engine, product) = setup(5).await;
        let buyer = BuyerId::new();
        engine.add(buyer, product.id, 3).await.unwrap();

        let err = engine.add(buyer, product.id, 4).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock {
                requested: 7,
                available: 5,
                ..
            }
        ));

        let view = engine.view(buyer).await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].quantity, 3);
        assert_eq!(view.total, Decimal::new(300, 1));
    }

    #[tokio::test]
    async fn test_remove_partial_recomputes_price() {
        let (_, engine, product) = setup(5).await;
        let buyer = BuyerId::new();
        engine.add(buyer, product.id, 3).await.unwrap();

        let item = engine.remove(buyer, product.id, 1).await.unwrap().unwrap();

        assert_eq!(item.quantity, 2);
        assert_eq!(item.price.amount(), Decimal::new(200, 1));
    }

    #[tokio::test]
    async fn test_remove_all_deletes_line() {
        let (_, engine, product) = setup(5).await;
        let buyer = BuyerId::new();
        engine.add(buyer, product.id, 2).await.unwrap();

        assert!(engine.remove(buyer, product.id, 9).await.unwrap().is_none());
        assert!(engine.view(buyer).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_add_never_takes_stock() {
        let (store, engine, product) = setup(5).await;
        engine.add(BuyerId::new(), product.id, 5).await.unwrap();

        let stored = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 5);
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let (_, engine, product) = setup(5).await;
        let err = engine.add(BuyerId::new(), product.id, 0).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unknown_product_not_found() {
        let (_, engine, _) = setup(5).await;
        let err = engine
            .add(BuyerId::new(), ProductId::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_cart_not_found() {
        let (_, engine, _) = setup(5).await;
        let buyer = BuyerId::new();
        assert!(matches!(engine.view(buyer).await, Err(AppError::NotFound(_))));
        assert!(matches!(engine.save(buyer).await, Err(AppError::NotFound(_))));
        assert!(matches!(engine.clear(buyer).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_and_clear_keep_cart() {
        let (_, engine, product) = setup(5).await;
        let buyer = BuyerId::new();
        engine.add(buyer, product.id, 1).await.unwrap();

        assert!(engine.save(buyer).await.unwrap().saved);
        assert_eq!(engine.clear(buyer).await.unwrap(), 1);

        let view = engine.view(buyer).await.unwrap();
        assert!(view.items.is_empty());
        assert_eq!(view.total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_adds_respect_stock() {
        let (_, engine, product) = setup(5).await;
        let buyer = BuyerId::new();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.add(buyer, product.id, 1).await })
            })
            .collect();
        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 5);
        assert_eq!(engine.view(buyer).await.unwrap().items[0].quantity, 5);
    }

    #[tokio::test]
    async fn test_add_for_product_deleted_mid_add() {
        let store = Arc::new(MemoryStore::new());
        let engine = CartEngine::new(store.clone(), Arc::new(VanishingCatalog(store.clone())));
        let product = lamp(Price::parse(Decimal::new(100, 1)).unwrap(), 3);
        store.insert_product(&product).await.unwrap();
        let buyer = BuyerId::new();

        let err = engine.add(buyer, product.id, 1).await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.get_product(product.id).await.unwrap().is_none());
        let cart = store.cart_for_buyer(buyer).await.unwrap().unwrap();
        assert!(store.items(cart.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_line_price_overflow_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = CartEngine::new(store.clone(), store.clone());
        let product = lamp(HUGE_PRICE.parse().unwrap(), 5);
        store.insert_product(&product).await.unwrap();
        let buyer = BuyerId::new();

        let err = engine.add(buyer, product.id, 2).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        engine.add(buyer, product.id, 1).await.unwrap();
        let err = engine.add(buyer, product.id, 1).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert_eq!(engine.view(buyer).await.unwrap().items[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_cart_total_overflow_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = CartEngine::new(store.clone(), store.clone());
        let first = lamp(HUGE_PRICE.parse().unwrap(), 5);
        let second = lamp(HUGE_PRICE.parse().unwrap(), 5);
        store.insert_product(&first).await.unwrap();
        store.insert_product(&second).await.unwrap();
        let buyer = BuyerId::new();

        engine.add(buyer, first.id, 1).await.unwrap();
        let err = engine.add(buyer, second.id, 1).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let view = engine.view(buyer).await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.total, HUGE_PRICE.parse::<Decimal>().unwrap());
    }

    #[tokio::test]
    async fn test_view_rejects_overflowing_total() {
        let (store, engine, product) = setup(5).await;
        let buyer = BuyerId::new();
        engine.add(buyer, product.id, 1).await.unwrap();
        let cart = store.cart_for_buyer(buyer).await.unwrap().unwrap();
        for _ in 0..2 {
            let other = lamp(HUGE_PRICE.parse().unwrap(), 1);
            store.insert_product(&other).await.unwrap();
            let line = CartItem {
                cart_id: cart.id,
                product_id: other.id,
                seller_id: other.seller_id,
                quantity: 1,
                price: other.sale_price,
            };
            store.upsert_item(&line).await.unwrap();
        }

        let err = engine.view(buyer).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let (_, engine, product) = setup(50).await;
        let buyers: Vec<_> = (0..8).map(|_| BuyerId::new()).collect();

        let tasks: Vec<_> = buyers
            .iter()
            .flat_map(|buyer| std::iter::repeat_n(*buyer, 4))
            .map(|buyer| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.add(buyer, product.id, 1).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(engine.locks.is_empty());

        let held = engine.lock(buyers[0]).await;
        assert_eq!(engine.locks.len(), 1);
        drop(held);
        assert!(engine.locks.is_empty());

        engine.view(buyers[1]).await.unwrap();
        assert!(matches!(engine.view(BuyerId::new()).await, Err(AppError::NotFound(_))));
        assert!(engine.locks.is_empty());
    }

    proptest! {
        #[test]
        fn prop_split_adds_equal_single_add(a in 1u32..50, b in 1u32..50) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (split, merged) = rt.block_on(async {
                let (_, engine, product) = setup(a + b).await;
                let first = BuyerId::new();
                engine.add(first, product.id, a).await.unwrap();
                let split = engine.add(first, product.id, b).await.unwrap();
                let merged = engine.add(BuyerId::new(), product.id, a + b).await.unwrap();
                (split, merged)
            });
            prop_assert_eq!(split.quantity, merged.quantity);
            prop_assert_eq!(split.price, merged.price);
        }

        #[test]
        fn prop_stock_ceiling(stock in 1u32..20, existing in 1u32..20, delta in 1u32..20) {
            prop_assume!(existing <= stock);
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (result, held) = rt.block_on(async {
                let (_, engine, product) = setup(stock).await;
                let buyer = BuyerId::new();
                engine.add(buyer, product.id, existing).await.unwrap();
                let result = engine.add(buyer, product.id, delta).await;
                let held = engine.view(buyer).await.unwrap().items[0].quantity;
                (result, held)
            });
            if existing + delta <= stock {
                prop_assert!(result.is_ok());
                prop_assert_eq!(held, existing + delta);
            } else {
                let is_insufficient = matches!(result, Err(AppError::InsufficientStock { .. }));
                prop_assert!(is_insufficient);
                prop_assert_eq!(held, existing);
            }
        }
    }
}
