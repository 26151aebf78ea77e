//! Buyer subcommands.

use clap::{Subcommand, ValueEnum};
use serde_json::Value;

use marketplace_core::protocol::{
    CommandCode, Credentials, Feedback, PaymentDetails, ProductQuantity, ProductRef, SearchQuery,
    Signup,
};
use marketplace_core::{Category, Keywords, ProductId};

use super::ArgumentError;

#[derive(Subcommand)]
pub enum BuyerAction {
    /// Create a buyer account
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Log in and print the session token
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// End the current session
    Logout,
    /// Search products in a category
    Search {
        /// Category, by name (`THREE`) or number (`3`)
        #[arg(short, long)]
        category: Category,
        /// Keyword to match; repeat for more
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,
    },
    /// Add a product to the cart
    Add { product_id: ProductId, quantity: u32 },
    /// Remove quantity of a product from the cart
    Remove { product_id: ProductId, quantity: u32 },
    /// Save the cart
    Save,
    /// Empty the cart
    Clear,
    /// Show the cart
    Cart,
    /// Rate a purchased product
    Feedback { product_id: ProductId, vote: Vote },
    /// Show the rating of the seller of a product
    SellerRating { product_id: ProductId },
    /// List past purchases
    History,
    /// Pay for the cart
    Checkout {
        /// Name on the card
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        card_number: String,
        /// Expiry as `MM/YY`
        #[arg(short, long)]
        expiry: String,
    },
    /// Delete the account and everything it owns
    Delete,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Vote {
    Up,
    Down,
}

impl BuyerAction {
    /// Command and payload for this action.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments do not form a valid payload.
    pub fn into_request(self) -> Result<(CommandCode, Value), ArgumentError> {
        let request = match self {
            Self::Create {
                name,
                username,
                password,
            } => (
                CommandCode::CreateBuyer,
                serde_json::to_value(Signup {
                    name,
                    username,
                    password,
                })?,
            ),
            Self::Login { username, password } => (
                CommandCode::BuyerLogin,
                serde_json::to_value(Credentials { username, password })?,
            ),
            Self::Logout => (CommandCode::BuyerLogout, Value::Null),
            Self::Search { category, keywords } => (
                CommandCode::SearchProducts,
                serde_json::to_value(SearchQuery {
                    category,
                    keywords: Keywords::parse(keywords)?,
                })?,
            ),
            Self::Add {
                product_id,
                quantity,
            } => (
                CommandCode::AddToCart,
                serde_json::to_value(ProductQuantity {
                    product_id,
                    quantity,
                })?,
            ),
            Self::Remove {
                product_id,
                quantity,
            } => (
                CommandCode::RemoveFromCart,
                serde_json::to_value(ProductQuantity {
                    product_id,
                    quantity,
                })?,
            ),
            Self::Save => (CommandCode::SaveCart, Value::Null),
            Self::Clear => (CommandCode::ClearCart, Value::Null),
            Self::Cart => (CommandCode::ViewCart, Value::Null),
            Self::Feedback { product_id, vote } => (
                CommandCode::ProvideFeedback,
                serde_json::to_value(Feedback {
                    product_id,
                    liked: matches!(vote, Vote::Up),
                })?,
            ),
            Self::SellerRating { product_id } => (
                CommandCode::SellerRatingForProduct,
                serde_json::to_value(ProductRef { product_id })?,
            ),
            Self::History => (CommandCode::PurchaseHistory, Value::Null),
            Self::Checkout {
                name,
                card_number,
                expiry,
            } => (
                CommandCode::Checkout,
                serde_json::to_value(PaymentDetails {
                    name,
                    card_number,
                    expiry,
                })?,
            ),
            Self::Delete => (CommandCode::DeleteBuyer, Value::Null),
        };
        Ok(request)
    }
}
