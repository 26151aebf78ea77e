//! `PostgreSQL` store.
//!
//! # Schema: `market`
//!
//! - `session` - live session tokens
//! - `buyer`, `seller` - accounts with Argon2 password hashes
//! - `product` - the catalog; keywords live in a GIN-indexed `TEXT[]`
//! - `cart`, `cart_item` - one cart per buyer
//! - `transaction` - append-only purchase ledger
//!
//! Queries are checked at runtime (`query_as` + `FromRow`) so the crate
//! builds without a live database. Counters are `INTEGER` columns guarded
//! by `CHECK (... >= 0)` and converted to `u32` on the way out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use marketplace_core::{
    AccountId, BuyerId, CartId, Category, Condition, Keywords, Price, ProductId, Rating, Role,
    SellerId, SessionToken, TransactionId,
};

use super::{
    AccountStore, CartStore, CatalogStore, RepositoryError, SaleRemoval, SessionStore,
    TransactionStore,
};
use crate::models::{Buyer, Cart, CartItem, NewAccount, Product, Seller, Session, Transaction};

/// Store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store on top of `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    token: String,
    user_id: AccountId,
    role: Role,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            token: SessionToken::new(row.token),
            user_id: row.user_id,
            role: row.role,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BuyerRow {
    id: BuyerId,
    name: String,
    username: String,
    items_purchased: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<BuyerRow> for Buyer {
    type Error = RepositoryError;

    fn try_from(row: BuyerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            username: row.username,
            items_purchased: from_db(row.items_purchased, "buyer.items_purchased")?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SellerRow {
    id: SellerId,
    name: String,
    username: String,
    thumbs_up: i32,
    thumbs_down: i32,
    items_sold: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<SellerRow> for Seller {
    type Error = RepositoryError;

    fn try_from(row: SellerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            username: row.username,
            rating: rating_from_db(row.thumbs_up, row.thumbs_down)?,
            items_sold: from_db(row.items_sold, "seller.items_sold")?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    category: Category,
    keywords: Vec<String>,
    condition: Condition,
    sale_price: Price,
    seller_id: SellerId,
    quantity: i32,
    thumbs_up: i32,
    thumbs_down: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let keywords = Keywords::parse(&row.keywords).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid keywords in database: {e}"))
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            category: row.category,
            keywords,
            condition: row.condition,
            sale_price: row.sale_price,
            seller_id: row.seller_id,
            quantity: from_db(row.quantity, "product.quantity")?,
            rating: rating_from_db(row.thumbs_up, row.thumbs_down)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: CartId,
    buyer_id: BuyerId,
    saved: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CartRow> for Cart {
    fn from(row: CartRow) -> Self {
        Self {
            id: row.id,
            buyer_id: row.buyer_id,
            saved: row.saved,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    cart_id: CartId,
    product_id: ProductId,
    seller_id: SellerId,
    quantity: i32,
    price: Price,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = RepositoryError;

    fn try_from(row: CartItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            cart_id: row.cart_id,
            product_id: row.product_id,
            seller_id: row.seller_id,
            quantity: from_db(row.quantity, "cart_item.quantity")?,
            price: row.price,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: TransactionId,
    cart_id: CartId,
    product_id: ProductId,
    buyer_id: BuyerId,
    seller_id: SellerId,
    quantity: i32,
    price: Price,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = RepositoryError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            cart_id: row.cart_id,
            product_id: row.product_id,
            buyer_id: row.buyer_id,
            seller_id: row.seller_id,
            quantity: from_db(row.quantity, "transaction.quantity")?,
            price: row.price,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RatingRow {
    thumbs_up: i32,
    thumbs_down: i32,
}

const PRODUCT_COLUMNS: &str = "id, name, category, keywords, condition, sale_price, seller_id, \
                               quantity, thumbs_up, thumbs_down, created_at";

const TRANSACTION_COLUMNS: &str =
    "id, cart_id, product_id, buyer_id, seller_id, quantity, price, created_at";

// =============================================================================
// Helper Functions
// =============================================================================

fn from_db(value: i32, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::DataCorruption(format!("negative value {value} in {column}"))
    })
}

fn to_db(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::Conflict(format!("value {value} out of range")))
}

fn rating_from_db(thumbs_up: i32, thumbs_down: i32) -> Result<Rating, RepositoryError> {
    Ok(Rating::new(
        from_db(thumbs_up, "thumbs_up")?,
        from_db(thumbs_down, "thumbs_down")?,
    ))
}

fn conflict_on_unique(e: sqlx::Error, message: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(message.to_owned());
    }
    RepositoryError::Database(e)
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, RepositoryError>
where
    T: TryFrom<R, Error = RepositoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =============================================================================
// Sessions
// =============================================================================

#[async_trait]
impl SessionStore for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO market.session (token, user_id, role, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(session.token.as_str())
        .bind(session.user_id)
        .bind(session.role)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, token: &SessionToken) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r"
            SELECT token, user_id, role, created_at, expires_at
            FROM market.session
            WHERE token = $1
            ",
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    async fn delete_session(&self, token: &SessionToken) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.session WHERE token = $1")
            .bind(token.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_sessions_for(&self, user_id: AccountId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.session WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.session WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Accounts
// =============================================================================

#[async_trait]
impl AccountStore for PgStore {
    async fn create_buyer(&self, account: NewAccount) -> Result<Buyer, RepositoryError> {
        let row = sqlx::query_as::<_, BuyerRow>(
            r"
            INSERT INTO market.buyer (id, name, username, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, username, items_purchased, created_at
            ",
        )
        .bind(BuyerId::new())
        .bind(&account.name)
        .bind(&account.username)
        .bind(&account.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "username already exists"))?;
        Buyer::try_from(row)
    }

    async fn create_seller(&self, account: NewAccount) -> Result<Seller, RepositoryError> {
        let row = sqlx::query_as::<_, SellerRow>(
            r"
            INSERT INTO market.seller (id, name, username, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, username, thumbs_up, thumbs_down, items_sold, created_at
            ",
        )
        .bind(SellerId::new())
        .bind(&account.name)
        .bind(&account.username)
        .bind(&account.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "username already exists"))?;
        Seller::try_from(row)
    }

    async fn get_buyer(&self, id: BuyerId) -> Result<Option<Buyer>, RepositoryError> {
        let row = sqlx::query_as::<_, BuyerRow>(
            r"
            SELECT id, name, username, items_purchased, created_at
            FROM market.buyer
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Buyer::try_from).transpose()
    }

    async fn get_seller(&self, id: SellerId) -> Result<Option<Seller>, RepositoryError> {
        let row = sqlx::query_as::<_, SellerRow>(
            r"
            SELECT id, name, username, thumbs_up, thumbs_down, items_sold, created_at
            FROM market.seller
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Seller::try_from).transpose()
    }

    async fn buyer_password_hash(
        &self,
        username: &str,
    ) -> Result<Option<(Buyer, String)>, RepositoryError> {
        let row = sqlx::query_as::<_, BuyerRow>(
            r"
            SELECT id, name, username, items_purchased, created_at
            FROM market.buyer
            WHERE username = $1
            ",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let hash: String =
            sqlx::query_scalar("SELECT password_hash FROM market.buyer WHERE id = $1")
                .bind(row.id)
                .fetch_one(&self.pool)
                .await?;
        Ok(Some((Buyer::try_from(row)?, hash)))
    }

    async fn seller_password_hash(
        &self,
        username: &str,
    ) -> Result<Option<(Seller, String)>, RepositoryError> {
        let row = sqlx::query_as::<_, SellerRow>(
            r"
            SELECT id, name, username, thumbs_up, thumbs_down, items_sold, created_at
            FROM market.seller
            WHERE username = $1
            ",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let hash: String =
            sqlx::query_scalar("SELECT password_hash FROM market.seller WHERE id = $1")
                .bind(row.id)
                .fetch_one(&self.pool)
                .await?;
        Ok(Some((Seller::try_from(row)?, hash)))
    }

    async fn record_seller_feedback(
        &self,
        id: SellerId,
        liked: bool,
    ) -> Result<Rating, RepositoryError> {
        let row = sqlx::query_as::<_, RatingRow>(
            r"
            UPDATE market.seller
            SET thumbs_up = thumbs_up + CASE WHEN $2 THEN 1 ELSE 0 END,
                thumbs_down = thumbs_down + CASE WHEN $2 THEN 0 ELSE 1 END
            WHERE id = $1
            RETURNING thumbs_up, thumbs_down
            ",
        )
        .bind(id)
        .bind(liked)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        rating_from_db(row.thumbs_up, row.thumbs_down)
    }

    async fn add_items_sold(&self, id: SellerId, count: u32) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE market.seller SET items_sold = items_sold + $2 WHERE id = $1")
                .bind(id)
                .bind(to_db(count)?)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn add_items_purchased(&self, id: BuyerId, count: u32) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE market.buyer SET items_purchased = items_purchased + $2 WHERE id = $1",
        )
        .bind(id)
        .bind(to_db(count)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_buyer(&self, id: BuyerId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.buyer WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_seller(&self, id: SellerId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.seller WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[async_trait]
impl CatalogStore for PgStore {
    async fn insert_product(&self, product: &Product) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO market.product
                (id, name, category, keywords, condition, sale_price, seller_id,
                 quantity, thumbs_up, thumbs_down, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.category)
        .bind(product.keywords.as_slice())
        .bind(product.condition)
        .bind(product.sale_price)
        .bind(product.seller_id)
        .bind(to_db(product.quantity)?)
        .bind(to_db(product.rating.thumbs_up)?)
        .bind(to_db(product.rating.thumbs_down)?)
        .bind(product.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM market.product WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Product::try_from).transpose()
    }

    async fn update_price(&self, id: ProductId, price: Price) -> Result<Product, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "UPDATE market.product SET sale_price = $2 WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(price)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        Product::try_from(row)
    }

    async fn products_by_seller(&self, seller: SellerId) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM market.product WHERE seller_id = $1 ORDER BY created_at"
        ))
        .bind(seller)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn search_products(
        &self,
        category: Category,
        keywords: &Keywords,
    ) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            r"
            SELECT {PRODUCT_COLUMNS}
            FROM market.product
            WHERE category = $1
              AND quantity > 0
              AND (cardinality($2::text[]) = 0 OR keywords && $2::text[])
            ORDER BY created_at
            "
        ))
        .bind(category)
        .bind(keywords.as_slice())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn reserve_stock(&self, id: ProductId, quantity: u32) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE market.product
            SET quantity = quantity - $2
            WHERE id = $1 AND quantity >= $2
            ",
        )
        .bind(id)
        .bind(to_db(quantity)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM market.product WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn restock(&self, id: ProductId, quantity: u32) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE market.product SET quantity = quantity + $2 WHERE id = $1")
                .bind(id)
                .bind(to_db(quantity)?)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn remove_from_sale(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<SaleRemoval, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r"
            UPDATE market.product
            SET quantity = GREATEST(quantity - $2, 0)
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(to_db(quantity)?)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        let product = Product::try_from(row)?;
        if product.quantity > 0 {
            tx.commit().await?;
            return Ok(SaleRemoval::Reduced(product));
        }

        sqlx::query("DELETE FROM market.cart_item WHERE product_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM market.product WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(SaleRemoval::Deleted)
    }

    async fn record_product_feedback(
        &self,
        id: ProductId,
        liked: bool,
    ) -> Result<Rating, RepositoryError> {
        let row = sqlx::query_as::<_, RatingRow>(
            r"
            UPDATE market.product
            SET thumbs_up = thumbs_up + CASE WHEN $2 THEN 1 ELSE 0 END,
                thumbs_down = thumbs_down + CASE WHEN $2 THEN 0 ELSE 1 END
            WHERE id = $1
            RETURNING thumbs_up, thumbs_down
            ",
        )
        .bind(id)
        .bind(liked)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        rating_from_db(row.thumbs_up, row.thumbs_down)
    }

    async fn delete_products_by_seller(&self, seller: SellerId) -> Result<u64, RepositoryError> {
        // Products go first so their row locks block concurrent cart upserts
        // until the cart lines below are gone too.
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM market.product WHERE seller_id = $1")
            .bind(seller)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM market.cart_item WHERE seller_id = $1")
            .bind(seller)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Carts
// =============================================================================

#[async_trait]
impl CartStore for PgStore {
    async fn cart_for_buyer(&self, buyer: BuyerId) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(
            r"
            SELECT id, buyer_id, saved, created_at, updated_at
            FROM market.cart
            WHERE buyer_id = $1
            ",
        )
        .bind(buyer)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Cart::from))
    }

    async fn get_or_create_cart(&self, buyer: BuyerId) -> Result<Cart, RepositoryError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, CartRow>(
            r"
            INSERT INTO market.cart (id, buyer_id)
            VALUES ($1, $2)
            ON CONFLICT (buyer_id) DO UPDATE SET buyer_id = EXCLUDED.buyer_id
            RETURNING id, buyer_id, saved, created_at, updated_at
            ",
        )
        .bind(CartId::new())
        .bind(buyer)
        .fetch_one(&self.pool)
        .await?;
        Ok(Cart::from(row))
    }

    async fn get_item(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<Option<CartItem>, RepositoryError> {
        let row = sqlx::query_as::<_, CartItemRow>(
            r"
            SELECT cart_id, product_id, seller_id, quantity, price
            FROM market.cart_item
            WHERE cart_id = $1 AND product_id = $2
            ",
        )
        .bind(cart)
        .bind(product)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CartItem::try_from).transpose()
    }

    async fn upsert_item(&self, item: &CartItem) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        // FOR SHARE conflicts with the row locks taken by remove_from_sale and
        // delete_products_by_seller, so a line is never written for a product
        // whose cascade has already run.
        let product: Option<ProductId> =
            sqlx::query_scalar("SELECT id FROM market.product WHERE id = $1 FOR SHARE")
                .bind(item.product_id)
                .fetch_optional(&mut *tx)
                .await?;
        if product.is_none() {
            return Err(RepositoryError::NotFound);
        }
        sqlx::query(
            r"
            INSERT INTO market.cart_item (cart_id, product_id, seller_id, quantity, price)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET seller_id = EXCLUDED.seller_id,
                          quantity = EXCLUDED.quantity,
                          price = EXCLUDED.price
            ",
        )
        .bind(item.cart_id)
        .bind(item.product_id)
        .bind(item.seller_id)
        .bind(to_db(item.quantity)?)
        .bind(item.price)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE market.cart SET updated_at = now() WHERE id = $1")
            .bind(item.cart_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_item(&self, cart: CartId, product: ProductId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM market.cart_item WHERE cart_id = $1 AND product_id = $2")
                .bind(cart)
                .bind(product)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn items(&self, cart: CartId) -> Result<Vec<CartItem>, RepositoryError> {
        let rows = sqlx::query_as::<_, CartItemRow>(
            r"
            SELECT cart_id, product_id, seller_id, quantity, price
            FROM market.cart_item
            WHERE cart_id = $1
            ",
        )
        .bind(cart)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn clear_items(&self, cart: CartId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.cart_item WHERE cart_id = $1")
            .bind(cart)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_saved(&self, cart: CartId, saved: bool) -> Result<Cart, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(
            r"
            UPDATE market.cart
            SET saved = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, buyer_id, saved, created_at, updated_at
            ",
        )
        .bind(cart)
        .bind(saved)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        Ok(Cart::from(row))
    }

    async fn delete_cart_for_buyer(&self, buyer: BuyerId) -> Result<bool, RepositoryError> {
        // cart_item rows go with the cart (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM market.cart WHERE buyer_id = $1")
            .bind(buyer)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[async_trait]
impl TransactionStore for PgStore {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO market.transaction
                (id, cart_id, product_id, buyer_id, seller_id, quantity, price, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(transaction.id)
        .bind(transaction.cart_id)
        .bind(transaction.product_id)
        .bind(transaction.buyer_id)
        .bind(transaction.seller_id)
        .bind(to_db(transaction.quantity)?)
        .bind(transaction.price)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transactions_by_cart(
        &self,
        cart: CartId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM market.transaction WHERE cart_id = $1 ORDER BY created_at"
        ))
        .bind(cart)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn transactions_by_buyer(
        &self,
        buyer: BuyerId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM market.transaction WHERE buyer_id = $1 ORDER BY created_at"
        ))
        .bind(buyer)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn transactions_by_seller(
        &self,
        seller: SellerId,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM market.transaction WHERE seller_id = $1 ORDER BY created_at"
        ))
        .bind(seller)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn has_purchased(
        &self,
        buyer: BuyerId,
        product: ProductId,
    ) -> Result<bool, RepositoryError> {
        let purchased: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM market.transaction
                WHERE buyer_id = $1 AND product_id = $2
            )
            ",
        )
        .bind(buyer)
        .bind(product)
        .fetch_one(&self.pool)
        .await?;
        Ok(purchased)
    }

    async fn delete_transactions_by_cart(&self, cart: CartId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.transaction WHERE cart_id = $1")
            .bind(cart)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_transactions_by_buyer(&self, buyer: BuyerId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.transaction WHERE buyer_id = $1")
            .bind(buyer)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_transactions_by_seller(
        &self,
        seller: SellerId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM market.transaction WHERE seller_id = $1")
            .bind(seller)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
