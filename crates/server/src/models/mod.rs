//! Domain models.
//!
//! These are the records the stores hold and, for everything except
//! [`Session`], the shapes returned to clients as response payloads.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use marketplace_core::{
    AccountId, BuyerId, CartId, Category, Condition, Keywords, Price, ProductId, Rating, Role,
    SellerId, SessionToken, TransactionId,
};

// =============================================================================
// Sessions
// =============================================================================

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: SessionToken,
    pub user_id: AccountId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// True once `now` has reached the expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The session's buyer, if it belongs to one.
    #[must_use]
    pub fn buyer_id(&self) -> Option<BuyerId> {
        (self.role == Role::Buyer).then(|| BuyerId::from(self.user_id))
    }

    /// The session's seller, if it belongs to one.
    #[must_use]
    pub fn seller_id(&self) -> Option<SellerId> {
        (self.role == Role::Seller).then(|| SellerId::from(self.user_id))
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// Fields needed to create either kind of account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub username: String,
    pub password_hash: String,
}

/// A buyer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: BuyerId,
    pub name: String,
    pub username: String,
    pub items_purchased: u32,
    pub created_at: DateTime<Utc>,
}

/// A seller account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub id: SellerId,
    pub name: String,
    pub username: String,
    pub rating: Rating,
    pub items_sold: u32,
    pub created_at: DateTime<Utc>,
}

/// Public rating summary for a seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerRating {
    pub seller_id: SellerId,
    pub name: String,
    pub rating: Rating,
    pub items_sold: u32,
}

impl From<Seller> for SellerRating {
    fn from(seller: Seller) -> Self {
        Self {
            seller_id: seller.id,
            name: seller.name,
            rating: seller.rating,
            items_sold: seller.items_sold,
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A listed product.
///
/// `quantity` is the only record of available stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: Category,
    pub keywords: Keywords,
    pub condition: Condition,
    pub sale_price: Price,
    pub seller_id: SellerId,
    pub quantity: u32,
    pub rating: Rating,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Whether the product answers a search for `category` and `keywords`.
    ///
    /// An empty keyword list matches every product in the category.
    #[must_use]
    pub fn matches(&self, category: Category, keywords: &Keywords) -> bool {
        self.category == category && (keywords.is_empty() || self.keywords.intersects(keywords))
    }
}

// =============================================================================
// Carts
// =============================================================================

/// A buyer's cart. Each buyer has at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub buyer_id: BuyerId,
    pub saved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// A fresh, empty, unsaved cart.
    #[must_use]
    pub fn new(buyer_id: BuyerId) -> Self {
        let now = Utc::now();
        Self {
            id: CartId::new(),
            buyer_id,
            saved: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One product line in a cart.
///
/// `price` is the sale price times `quantity` at the last write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub seller_id: SellerId,
    pub quantity: u32,
    pub price: Price,
}

/// A cart with its lines and their total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    pub cart: Cart,
    pub items: Vec<CartItem>,
    pub total: Decimal,
}

impl CartView {
    /// Assemble a view, summing line prices.
    ///
    /// Returns `None` if the total overflows.
    #[must_use]
    pub fn new(cart: Cart, items: Vec<CartItem>) -> Option<Self> {
        let total = cart_total(&items)?;
        Some(Self { cart, items, total })
    }
}

/// Sum of line prices, or `None` if it does not fit in a `Decimal`.
#[must_use]
pub fn cart_total(items: &[CartItem]) -> Option<Decimal> {
    items
        .iter()
        .try_fold(Decimal::ZERO, |total, item| total.checked_add(item.price.amount()))
}

// =============================================================================
// Transactions
// =============================================================================

/// Immutable record of one purchased product line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    pub quantity: u32,
    pub price: Price,
    pub created_at: DateTime<Utc>,
}

/// Result of a completed checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub cart_id: CartId,
    pub transactions: Vec<Transaction>,
    pub total: Decimal,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product(category: Category, keywords: &[&str]) -> Product {
        Product {
            id: ProductId::new(),
            name: "Mug".to_owned(),
            category,
            keywords: Keywords::parse(keywords).unwrap(),
            condition: Condition::New,
            sale_price: "4.50".parse().unwrap(),
            seller_id: SellerId::new(),
            quantity: 1,
            rating: Rating::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_matches_category_and_any_keyword() {
        let mug = product(Category::Two, &["mug", "tea"]);
        let tea = Keywords::parse(["tea", "lamp"]).unwrap();
        assert!(mug.matches(Category::Two, &tea));
        assert!(!mug.matches(Category::Three, &tea));
        assert!(!mug.matches(Category::Two, &Keywords::parse(["lamp"]).unwrap()));
    }

    #[test]
    fn test_matches_without_keywords() {
        let mug = product(Category::Two, &["mug"]);
        assert!(mug.matches(Category::Two, &Keywords::default()));
    }

    #[test]
    fn test_cart_view_total() {
        let cart = Cart::new(BuyerId::new());
        let line = |price: &str| CartItem {
            cart_id: cart.id,
            product_id: ProductId::new(),
            seller_id: SellerId::new(),
            quantity: 1,
            price: price.parse().unwrap(),
        };
        let view = CartView::new(cart.clone(), vec![line("30.0"), line("2.5")]).unwrap();
        assert_eq!(view.total, Decimal::new(325, 1));

        let half = "50000000000000000000000000000";
        assert!(CartView::new(cart.clone(), vec![line(half), line(half)]).is_none());
        assert_eq!(cart_total(&[]), Some(Decimal::ZERO));
    }

    #[test]
    fn test_session_role_accessors() {
        let now = Utc::now();
        let session = Session {
            token: SessionToken::from("t"),
            user_id: AccountId::new(),
            role: Role::Seller,
            created_at: now,
            expires_at: now,
        };
        assert!(session.buyer_id().is_none());
        assert!(session.seller_id().is_some());
        assert!(session.is_expired_at(now));
    }
}
