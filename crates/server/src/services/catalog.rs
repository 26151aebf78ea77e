//! Catalog service: listing, pricing and searching products.

use std::sync::Arc;

use chrono::Utc;

use marketplace_core::protocol::{NewProduct, PriceChange, SearchQuery};
use marketplace_core::{ProductId, Rating, SellerId};

use crate::db::{AccountStore, CatalogStore, SaleRemoval};
use crate::error::{AppError, Result, StoreContext};
use crate::models::{Product, SellerRating, Transaction};

use super::ledger::TransactionLedger;

/// Product operations for sellers and buyers.
#[derive(Clone)]
pub struct CatalogService {
    catalog: Arc<dyn CatalogStore>,
    accounts: Arc<dyn AccountStore>,
    ledger: TransactionLedger,
}

impl CatalogService {
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

    /// List a new product for `seller`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a blank name or zero quantity.
    #[tracing::instrument(skip_all, fields(seller_id = %seller, name = %listing.name))]
    pub async fn create_product(&self, seller: SellerId, listing: &NewProduct) -> Result<Product> {
        let name = listing.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument(
                "product name is required".to_string(),
            ));
        }
        if listing.quantity == 0 {
            return Err(AppError::InvalidArgument(
                "quantity must be greater than zero".to_string(),
            ));
        }

        let product = Product {
            id: ProductId::new(),
            name: name.to_string(),
            category: listing.category,
            keywords: listing.keywords.clone(),
            condition: listing.condition,
            sale_price: listing.sale_price,
            seller_id: seller,
            quantity: listing.quantity,
            rating: Rating::default(),
            created_at: Utc::now(),
        };
        self.catalog
            .insert_product(&product)
            .await
            .store_context("product", "create")?;

        tracing::info!(product_id = %product.id, "Product listed");
        Ok(product)
    }

    /// Change the sale price of one of the seller's products.
    ///
    /// Existing cart lines keep the price they were added at.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown product, `Forbidden` if another
    /// seller owns it.
    #[tracing::instrument(skip(self), fields(seller_id = %seller))]
    pub async fn change_price(&self, seller: SellerId, change: PriceChange) -> Result<Product> {
        self.owned(seller, change.product_id).await?;
        self.catalog
            .update_price(change.product_id, change.sale_price)
            .await
            .store_context("product", "update price")
    }

    /// Take `quantity` units of the seller's product off sale.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for zero quantity, `NotFound` for an
    /// unknown product, `Forbidden` if another seller owns it.
    #[tracing::instrument(skip(self), fields(seller_id = %seller, product_id = %product_id))]
    pub async fn remove_from_sale(
        &self,
        seller: SellerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<SaleRemoval> {
        if quantity == 0 {
            return Err(AppError::InvalidArgument(
                "quantity must be greater than zero".to_string(),
            ));
        }
        self.owned(seller, product_id).await?;
        let removal = self
            .catalog
            .remove_from_sale(product_id, quantity)
            .await
            .store_context("product", "remove from sale")?;
        if removal == SaleRemoval::Deleted {
            tracing::info!("Product sold out of listing and deleted");
        }
        Ok(removal)
    }

    /// Every product the seller has listed.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn list_own(&self, seller: SellerId) -> Result<Vec<Product>> {
        self.catalog
            .products_by_seller(seller)
            .await
            .store_context("product", "list")
    }

    /// Products in stock matching the query.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    #[tracing::instrument(skip_all, fields(category = %query.category))]
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>> {
        let products = self
            .catalog
            .search_products(query.category, &query.keywords)
            .await
            .store_context("product", "search")?;
        tracing::debug!(results = products.len(), "Search complete");
        Ok(products)
    }

    /// Rating of the seller who lists `product_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the product or its seller is gone.
    pub async fn seller_rating_for(&self, product_id: ProductId) -> Result<SellerRating> {
        let product = self.product(product_id).await?;
        self.accounts
            .get_seller(product.seller_id)
            .await
            .store_context("seller", "load")?
            .map(SellerRating::from)
            .ok_or_else(|| AppError::NotFound("Seller not found".to_string()))
    }

    /// Everything the seller has sold.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store call fails.
    pub async fn sold_items(&self, seller: SellerId) -> Result<Vec<Transaction>> {
        self.ledger.by_seller(seller).await
    }

    async fn product(&self, product_id: ProductId) -> Result<Product> {
        self.catalog
            .get_product(product_id)
            .await
            .store_context("product", "load")?
            .ok_or_else(|| AppError::NotFound("Product not found".to_string()))
    }

    async fn owned(&self, seller: SellerId, product_id: ProductId) -> Result<Product> {
        let product = self.product(product_id).await?;
        if product.seller_id != seller {
            return Err(AppError::Forbidden(
                "Product belongs to another seller".to_string(),
            ));
        }
        Ok(product)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::db::Stores;
    use crate::services::Services;
    use marketplace_core::{BuyerId, Category, Condition, Keywords, Price};
    use rust_decimal::Decimal;

    fn listing(name: &str, keywords: &[&str], quantity: u32) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            category: Category::Five,
            keywords: Keywords::parse(keywords).unwrap(),
            condition: Condition::New,
            sale_price: Price::parse(Decimal::new(100, 1)).unwrap(),
            quantity,
        }
    }

    fn services() -> Services {
        Services::new(Stores::memory(), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_create_product_validates() {
        let services = services();
        let seller = SellerId::new();

        assert!(matches!(
            services.catalog.create_product(seller, &listing(" ", &[], 1)).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            services.catalog.create_product(seller, &listing("Lamp", &[], 0)).await,
            Err(AppError::InvalidArgument(_))
        ));

        let product = services
            .catalog
            .create_product(seller, &listing(" Lamp ", &["lamp"], 5))
            .await
            .unwrap();
        assert_eq!(product.name, "Lamp");
        assert_eq!(product.seller_id, seller);
        assert_eq!(product.rating, Rating::default());
    }

    #[tokio::test]
    async fn test_change_price_owner_only() {
        let services = services();
        let owner = SellerId::new();
        let product = services
            .catalog
            .create_product(owner, &listing("Lamp", &[], 5))
            .await
            .unwrap();
        let change = PriceChange {
            product_id: product.id,
            sale_price: Price::parse(Decimal::new(125, 1)).unwrap(),
        };

        assert!(matches!(
            services.catalog.change_price(SellerId::new(), change).await,
            Err(AppError::Forbidden(_))
        ));
        let updated = services.catalog.change_price(owner, change).await.unwrap();
        assert_eq!(updated.sale_price, change.sale_price);
    }

    #[tokio::test]
    async fn test_remove_from_sale_to_zero_deletes_product_and_lines() {
        let services = services();
        let owner = SellerId::new();
        let buyer = BuyerId::new();
        let product = services
            .catalog
            .create_product(owner, &listing("Lamp", &[], 3))
            .await
            .unwrap();
        services.carts.add(buyer, product.id, 2).await.unwrap();

        let reduced = services
            .catalog
            .remove_from_sale(owner, product.id, 1)
            .await
            .unwrap();
        assert!(matches!(reduced, SaleRemoval::Reduced(ref p) if p.quantity == 2));

        let removal = services
            .catalog
            .remove_from_sale(owner, product.id, 5)
            .await
            .unwrap();
        assert_eq!(removal, SaleRemoval::Deleted);
        assert!(services.catalog.list_own(owner).await.unwrap().is_empty());
        assert!(services.carts.view(buyer).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_remove_from_sale_checks_owner_and_quantity() {
        let services = services();
        let owner = SellerId::new();
        let product = services
            .catalog
            .create_product(owner, &listing("Lamp", &[], 3))
            .await
            .unwrap();

        assert!(matches!(
            services.catalog.remove_from_sale(owner, product.id, 0).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            services
                .catalog
                .remove_from_sale(SellerId::new(), product.id, 1)
                .await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            services
                .catalog
                .remove_from_sale(owner, ProductId::new(), 1)
                .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_by_category_and_keyword() {
        let services = services();
        let seller = SellerId::new();
        let lamp = services
            .catalog
            .create_product(seller, &listing("Lamp", &["lamp", "light"], 2))
            .await
            .unwrap();
        services
            .catalog
            .create_product(seller, &listing("Chair", &["chair"], 2))
            .await
            .unwrap();

        let query = SearchQuery {
            category: Category::Five,
            keywords: Keywords::parse(["light", "desk"]).unwrap(),
        };
        let found = services.catalog.search(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, lamp.id);

        let everything = SearchQuery {
            category: Category::Five,
            keywords: Keywords::default(),
        };
        assert_eq!(services.catalog.search(&everything).await.unwrap().len(), 2);

        let elsewhere = SearchQuery {
            category: Category::Six,
            keywords: Keywords::default(),
        };
        assert!(services.catalog.search(&elsewhere).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seller_rating_for_unknown_product() {
        let services = services();
        assert!(matches!(
            services.catalog.seller_rating_for(ProductId::new()).await,
            Err(AppError::NotFound(_))
        ));
    }
}
