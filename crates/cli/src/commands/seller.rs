//! Seller subcommands.

use clap::Subcommand;
use serde_json::Value;

use marketplace_core::protocol::{
    CommandCode, Credentials, NewProduct, PriceChange, ProductQuantity, Signup,
};
use marketplace_core::{Category, Condition, Keywords, Price, ProductId};

use super::ArgumentError;

#[derive(Subcommand)]
pub enum SellerAction {
    /// Create a seller account
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
    /// Show your own rating
    Rating,
    /// Put a new product up for sale
    AddProduct {
        #[arg(short, long)]
        name: String,
        /// Category, by name (`THREE`) or number (`3`)
        #[arg(short, long)]
        category: Category,
        /// Keyword for search; repeat for more
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,
        /// `new` or `used`
        #[arg(long, default_value = "new")]
        condition: Condition,
        #[arg(short, long)]
        price: Price,
        #[arg(short, long)]
        quantity: u32,
    },
    /// Change the sale price of a product
    SetPrice { product_id: ProductId, price: Price },
    /// Take quantity of a product off sale
    Remove { product_id: ProductId, quantity: u32 },
    /// List your products
    List,
    /// List sold items
    Sold,
    /// Delete the account and its products
    Delete,
}

impl SellerAction {
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
                CommandCode::CreateSeller,
                serde_json::to_value(Signup {
                    name,
                    username,
                    password,
                })?,
            ),
            Self::Login { username, password } => (
                CommandCode::SellerLogin,
                serde_json::to_value(Credentials { username, password })?,
            ),
            Self::Logout => (CommandCode::SellerLogout, Value::Null),
            Self::Rating => (CommandCode::SellerRating, Value::Null),
            Self::AddProduct {
                name,
                category,
                keywords,
                condition,
                price,
                quantity,
            } => (
                CommandCode::CreateProduct,
                serde_json::to_value(NewProduct {
                    name,
                    category,
                    keywords: Keywords::parse(keywords)?,
                    condition,
                    sale_price: price,
                    quantity,
                })?,
            ),
            Self::SetPrice { product_id, price } => (
                CommandCode::ChangeSalePrice,
                serde_json::to_value(PriceChange {
                    product_id,
                    sale_price: price,
                })?,
            ),
            Self::Remove {
                product_id,
                quantity,
            } => (
                CommandCode::RemoveFromSale,
                serde_json::to_value(ProductQuantity {
                    product_id,
                    quantity,
                })?,
            ),
            Self::List => (CommandCode::ListProducts, Value::Null),
            Self::Sold => (CommandCode::SoldItems, Value::Null),
            Self::Delete => (CommandCode::DeleteSeller, Value::Null),
        };
        Ok(request)
    }
}
