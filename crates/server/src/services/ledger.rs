//! Transaction ledger and checkout.
//!
//! Transactions are immutable once written. They are created only by
//! checkout and removed only by account deletion.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use marketplace_core::protocol::PaymentDetails;
use marketplace_core::{BuyerId, CartId, Price, ProductId, SellerId, TransactionId};

use crate::db::{AccountStore, CartStore, CatalogStore, TransactionStore};
use crate::error::{AppError, Result, StoreContext};
use crate::models::{CartItem, Receipt, Transaction, cart_total};

use super::cart::CartEngine;
use super::payment::{PaymentGateway, validate_payment};

/// Records purchases and answers ledger queries.
#[derive(Clone)]
pub struct TransactionLedger {
    transactions: Arc<dyn TransactionStore>,
    catalog: Arc<dyn CatalogStore>,
    carts: Arc<dyn CartStore>,
    accounts: Arc<dyn AccountStore>,
    cart_engine: CartEngine,
    gateway: Arc<dyn PaymentGateway>,
}

impl TransactionLedger {
    #[must_use]
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        catalog: Arc<dyn CatalogStore>,
        carts: Arc<dyn CartStore>,
        accounts: Arc<dyn AccountStore>,
        cart_engine: CartEngine,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            transactions,
            catalog,
            carts,
            accounts,
            cart_engine,
            gateway,
        }
    }

    /// Persist one purchased line.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `quantity` is zero, or `StoreUnavailable`.
    pub async fn record(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        buyer_id: BuyerId,
        seller_id: SellerId,
        quantity: u32,
        price: Price,
    ) -> Result<Transaction> {
        if quantity == 0 {
            return Err(AppError::InvalidArgument(
                "transaction quantity must be greater than zero".to_string(),
            ));
        }
        let transaction = Transaction {
            id: TransactionId::new(),
            cart_id,
            product_id,
            buyer_id,
            seller_id,
            quantity,
            price,
            created_at: Utc::now(),
        };
        self.transactions
            .insert_transaction(&transaction)
            .await
            .store_context("transaction", "record")?;
        Ok(transaction)
    }

    /// Purchase everything in the buyer's cart.
    ///
    /// Stock for every line is reserved before anything is recorded. If a
    /// reservation fails, lines already reserved are restocked and the cart
    /// is left as it was.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for malformed or declined payment details
    /// - `NotFound` if the buyer has no cart or it is empty
    /// - `InsufficientStock` if any line cannot be reserved
    /// - `PartialUpdate` if recording stops after stock was taken
    #[tracing::instrument(skip(self, payment), fields(buyer_id = %buyer))]
    pub async fn checkout(&self, buyer: BuyerId, payment: &PaymentDetails) -> Result<Receipt> {
        validate_payment(payment)?;
        let _guard = self.cart_engine.lock(buyer).await;

        let cart = self
            .carts
            .cart_for_buyer(buyer)
            .await
            .store_context("cart", "load")?
            .ok_or_else(|| AppError::NotFound("Cart not found".to_string()))?;
        let items = self
            .carts
            .items(cart.id)
            .await
            .store_context("cart item", "list")?;
        if items.is_empty() {
            return Err(AppError::NotFound("Cart is empty".to_string()));
        }

        let total = cart_total(&items)
            .ok_or_else(|| AppError::InvalidArgument("cart total is too large".to_string()))?;
        if !self.gateway.approve(payment, total).await? {
            tracing::info!(%total, "Payment declined");
            return Err(AppError::InvalidArgument("payment declined".to_string()));
        }

        self.reserve_all(&items).await?;

        let mut recorded = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match self
                .record(
                    cart.id,
                    item.product_id,
                    buyer,
                    item.seller_id,
                    item.quantity,
                    item.price,
                )
                .await
            {
                Ok(transaction) => recorded.push(transaction),
                Err(err) => {
                    let unrecorded = items.get(index..).unwrap_or_default();
                    self.restock(unrecorded).await;
                    tracing::error!(
                        error = %err,
                        recorded = recorded.len(),
                        lines = items.len(),
                        "Checkout stopped while recording transactions"
                    );
                    return Err(AppError::PartialUpdate(format!(
                        "checkout recorded {} of {} lines",
                        recorded.len(),
                        items.len()
                    )));
                }
            }
        }

        if let Err(err) = self.carts.clear_items(cart.id).await {
            tracing::error!(error = %err, cart_id = %cart.id, "Purchased cart was not cleared");
            return Err(AppError::PartialUpdate(
                "purchase recorded but the cart was not cleared".to_string(),
            ));
        }

        self.bump_counters(buyer, &recorded).await;

        tracing::info!(lines = recorded.len(), %total, "Checkout complete");
        Ok(Receipt {
            cart_id: cart.id,
            transactions: recorded,
            total,
        })
    }

    /// Take stock for every line, or for none of them.
    async fn reserve_all(&self, items: &[CartItem]) -> Result<()> {
        for (index, item) in items.iter().enumerate() {
            let reserved = self
                .catalog
                .reserve_stock(item.product_id, item.quantity)
                .await;
            let taken = items.get(..index).unwrap_or_default();
            match reserved {
                Ok(true) => {}
                Ok(false) => {
                    self.restock(taken).await;
                    let available = self
                        .catalog
                        .get_product(item.product_id)
                        .await
                        .ok()
                        .flatten()
                        .map_or(0, |product| product.quantity);
                    return Err(AppError::InsufficientStock {
                        product_id: item.product_id,
                        requested: item.quantity,
                        available,
                    });
                }
                Err(err) => {
                    self.restock(taken).await;
                    return Err(err).store_context("product", "reserve stock");
                }
            }
        }
        Ok(())
    }

    /// Put reserved stock back. Failures are logged; there is nothing
    /// further to undo.
    async fn restock(&self, items: &[CartItem]) {
        for item in items {
            if let Err(err) = self.catalog.restock(item.product_id, item.quantity).await {
                tracing::error!(
                    error = %err,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    "Failed to restock after aborted checkout"
                );
            }
        }
    }

    /// Best-effort purchase counters.
    async fn bump_counters(&self, buyer: BuyerId, recorded: &[Transaction]) {
        let mut purchased = 0u32;
        let mut sold: HashMap<SellerId, u32> = HashMap::new();
        for transaction in recorded {
            purchased = purchased.saturating_add(transaction.quantity);
            let count = sold.entry(transaction.seller_id).or_default();
            *count = count.saturating_add(transaction.quantity);
        }

        if let Err(err) = self.accounts.add_items_purchased(buyer, purchased).await {
            tracing::warn!(error = %err, buyer_id = %buyer, "Failed to update items purchased");
        }
        for (seller, count) in sold {
            if let Err(err) = self.accounts.add_items_sold(seller, count).await {
                tracing::warn!(error = %err, seller_id = %seller, "Failed to update items sold");
            }
        }
    }

    /// Transactions recorded against a cart.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn by_cart(&self, cart: CartId) -> Result<Vec<Transaction>> {
        self.transactions
            .transactions_by_cart(cart)
            .await
            .store_context("transaction", "list")
    }

    /// A buyer's purchase history.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn by_buyer(&self, buyer: BuyerId) -> Result<Vec<Transaction>> {
        self.transactions
            .transactions_by_buyer(buyer)
            .await
            .store_context("transaction", "list")
    }

    /// Everything a seller has sold.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn by_seller(&self, seller: SellerId) -> Result<Vec<Transaction>> {
        self.transactions
            .transactions_by_seller(seller)
            .await
            .store_context("transaction", "list")
    }

    /// Whether `buyer` has bought `product`.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn has_purchased(&self, buyer: BuyerId, product: ProductId) -> Result<bool> {
        self.transactions
            .has_purchased(buyer, product)
            .await
            .store_context("transaction", "lookup")
    }

    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn delete_by_cart(&self, cart: CartId) -> Result<u64> {
        self.transactions
            .delete_transactions_by_cart(cart)
            .await
            .store_context("transaction", "delete")
    }

    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn delete_by_buyer(&self, buyer: BuyerId) -> Result<u64> {
        self.transactions
            .delete_transactions_by_buyer(buyer)
            .await
            .store_context("transaction", "delete")
    }

    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn delete_by_seller(&self, seller: SellerId) -> Result<u64> {
        self.transactions
            .delete_transactions_by_seller(seller)
            .await
            .store_context("transaction", "delete")
    }
}
