//! Product and seller feedback.

use std::sync::Arc;

use marketplace_core::{BuyerId, ProductId, Rating};

use crate::db::{AccountStore, CatalogStore};
use crate::error::{AppError, Result, StoreContext};

use super::ledger::TransactionLedger;

/// Ratings after one piece of feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FeedbackApplied {
    pub product: Rating,
    pub seller: Rating,
}

/// Applies buyer feedback to a product and its seller.
#[derive(Clone)]
pub struct RatingAggregator {
    catalog: Arc<dyn CatalogStore>,
    accounts: Arc<dyn AccountStore>,
    ledger: TransactionLedger,
}

impl RatingAggregator {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        accounts: Arc<dyn AccountStore>,
        ledger: TransactionLedger,
    ) -> Self {
        Self {
            catalog,
            accounts,
            ledger,
        }
    }

    /// Count a thumbs-up or thumbs-down on the product and then on its seller.
    ///
    /// The two counters live in separate records and are not updated
    /// atomically together. If the seller update fails after the product
    /// update succeeded, the product keeps its new count and the call
    /// reports `PartialUpdate`.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if the buyer never purchased the product
    /// - `NotFound` if the product no longer exists
    /// - `PartialUpdate` if only the product counter moved
    #[tracing::instrument(skip(self), fields(buyer_id = %buyer, product_id = %product_id))]
    pub async fn apply_feedback(
        &self,
        buyer: BuyerId,
        product_id: ProductId,
        liked: bool,
    ) -> Result<FeedbackApplied> {
        if !self.ledger.has_purchased(buyer, product_id).await? {
            return Err(AppError::Forbidden(
                "Feedback is only accepted for purchased products".to_string(),
            ));
        }

        let seller_id = self
            .catalog
            .get_product(product_id)
            .await
            .store_context("product", "load")?
            .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?
            .seller_id;

        let product = self
            .catalog
            .record_product_feedback(product_id, liked)
            .await
            .store_context("product", "rate")?;

        let seller = match self.accounts.record_seller_feedback(seller_id, liked).await {
            Ok(rating) => rating,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    seller_id = %seller_id,
                    "Product rated but seller rating was not updated"
                );
                return Err(AppError::PartialUpdate(
                    "product rating updated but seller rating was not".to_string(),
                ));
            }
        };

        tracing::debug!(liked, "Feedback applied");
        Ok(FeedbackApplied { product, seller })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{NewAccount, Product};
    use crate::services::cart::CartEngine;
    use crate::services::payment::LocalGateway;
    use chrono::Utc;
    use marketplace_core::protocol::PaymentDetails;
    use marketplace_core::{Category, Condition, Keywords, SellerId};

    struct Fixture {
        store: Arc<MemoryStore>,
        ratings: RatingAggregator,
        buyer: BuyerId,
        seller: SellerId,
        product: ProductId,
    }

    /// A buyer who has bought one unit of a seller's product.
    async fn purchased() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let carts = CartEngine::new(store.clone(), store.clone());
        let ledger = TransactionLedger::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            carts.clone(),
            Arc::new(LocalGateway),
        );
        let ratings = RatingAggregator::new(store.clone(), store.clone(), ledger.clone());

        let account = |username: &str| NewAccount {
            name: "Test".to_string(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
        };
        let buyer = store.create_buyer(account("buyer")).await.unwrap().id;
        let seller = store.create_seller(account("seller")).await.unwrap().id;
        let product = Product {
            id: ProductId::new(),
            name: "Kettle".to_string(),
            category: Category::Seven,
            keywords: Keywords::default(),
            condition: Condition::New,
            sale_price: "15".parse().unwrap(),
            seller_id: seller,
            quantity: 3,
            rating: Rating::default(),
            created_at: Utc::now(),
        };
        store.insert_product(&product).await.unwrap();

        carts.add(buyer, product.id, 1).await.unwrap();
        let card = PaymentDetails {
            name: "Ada".to_string(),
            card_number: "4111111111111111".to_string(),
            expiry: "09/28".to_string(),
        };
        ledger.checkout(buyer, &card).await.unwrap();

        Fixture {
            store,
            ratings,
            buyer,
            seller,
            product: product.id,
        }
    }

    #[tokio::test]
    async fn test_feedback_moves_both_counters() {
        let fx = purchased().await;

        let applied = fx
            .ratings
            .apply_feedback(fx.buyer, fx.product, true)
            .await
            .unwrap();

        assert_eq!(applied.product, Rating::new(1, 0));
        assert_eq!(applied.seller, Rating::new(1, 0));

        let applied = fx
            .ratings
            .apply_feedback(fx.buyer, fx.product, false)
            .await
            .unwrap();
        assert_eq!(applied.product, Rating::new(1, 1));
        assert_eq!(applied.seller, Rating::new(1, 1));
    }

    #[tokio::test]
    async fn test_feedback_requires_purchase() {
        let fx = purchased().await;
        let stranger = fx
            .store
            .create_buyer(NewAccount {
                name: "Other".to_string(),
                username: "other".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap()
            .id;

        let err = fx
            .ratings
            .apply_feedback(stranger, fx.product, true)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
        let product = fx.store.get_product(fx.product).await.unwrap().unwrap();
        assert_eq!(product.rating, Rating::default());
    }

    #[tokio::test]
    async fn test_seller_failure_is_partial_update() {
        let fx = purchased().await;
        fx.store.fail_operation("record_seller_feedback");

        let err = fx
            .ratings
            .apply_feedback(fx.buyer, fx.product, true)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PartialUpdate(_)));
        let product = fx.store.get_product(fx.product).await.unwrap().unwrap();
        assert_eq!(product.rating, Rating::new(1, 0));
        let seller = fx.store.get_seller(fx.seller).await.unwrap().unwrap();
        assert_eq!(seller.rating, Rating::default());
    }

    #[test]
    fn test_partial_update_reported_once() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let events = sentry::test::with_captured_events(|| {
            rt.block_on(async {
                let fx = purchased().await;
                fx.store.fail_operation("record_seller_feedback");
                let err = fx
                    .ratings
                    .apply_feedback(fx.buyer, fx.product, true)
                    .await
                    .unwrap_err();
                let _response = err.to_response();
            });
        });
        assert_eq!(events.len(), 1);
    }
}
