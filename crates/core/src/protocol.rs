//! Request/response envelope shared by the server and its clients.
//!
//! A request names one command by its short code (`B4`, `S5`, ...). The
//! code's prefix letter is the role the caller claims to hold; the server
//! checks that claim against the session before running anything.
//!
//! Payloads travel as raw JSON inside the envelope and are decoded into the
//! typed structs below once the command is known.

use core::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AccountId, Category, Condition, Keywords, Price, ProductId, Role, SessionToken};

// =============================================================================
// Command Codes
// =============================================================================

/// Every operation the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CommandCode {
    CreateBuyer,
    BuyerLogin,
    BuyerLogout,
    SearchProducts,
    AddToCart,
    RemoveFromCart,
    SaveCart,
    ClearCart,
    ViewCart,
    ProvideFeedback,
    SellerRatingForProduct,
    PurchaseHistory,
    Checkout,
    DeleteBuyer,
    CreateSeller,
    SellerLogin,
    SellerLogout,
    SellerRating,
    CreateProduct,
    ChangeSalePrice,
    RemoveFromSale,
    ListProducts,
    SoldItems,
    DeleteSeller,
}

impl CommandCode {
    /// All commands, buyer commands first.
    pub const ALL: [Self; 24] = [
        Self::CreateBuyer,
        Self::BuyerLogin,
        Self::BuyerLogout,
        Self::SearchProducts,
        Self::AddToCart,
        Self::RemoveFromCart,
        Self::SaveCart,
        Self::ClearCart,
        Self::ViewCart,
        Self::ProvideFeedback,
        Self::SellerRatingForProduct,
        Self::PurchaseHistory,
        Self::Checkout,
        Self::DeleteBuyer,
        Self::CreateSeller,
        Self::SellerLogin,
        Self::SellerLogout,
        Self::SellerRating,
        Self::CreateProduct,
        Self::ChangeSalePrice,
        Self::RemoveFromSale,
        Self::ListProducts,
        Self::SoldItems,
        Self::DeleteSeller,
    ];

    /// Short wire code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CreateBuyer => "B0",
            Self::BuyerLogin => "B1",
            Self::BuyerLogout => "B2",
            Self::SearchProducts => "B3",
            Self::AddToCart => "B4",
            Self::RemoveFromCart => "B5",
            Self::SaveCart => "B6",
            Self::ClearCart => "B7",
            Self::ViewCart => "B8",
            Self::ProvideFeedback => "B9",
            Self::SellerRatingForProduct => "B10",
            Self::PurchaseHistory => "B11",
            Self::Checkout => "B12",
            Self::DeleteBuyer => "B13",
            Self::CreateSeller => "S0",
            Self::SellerLogin => "S1",
            Self::SellerLogout => "S2",
            Self::SellerRating => "S3",
            Self::CreateProduct => "S4",
            Self::ChangeSalePrice => "S5",
            Self::RemoveFromSale => "S6",
            Self::ListProducts => "S7",
            Self::SoldItems => "S8",
            Self::DeleteSeller => "S9",
        }
    }

    /// Role the caller must hold, taken from the code's prefix.
    #[must_use]
    pub const fn declared_role(&self) -> Role {
        match self {
            Self::CreateSeller
            | Self::SellerLogin
            | Self::SellerLogout
            | Self::SellerRating
            | Self::CreateProduct
            | Self::ChangeSalePrice
            | Self::RemoveFromSale
            | Self::ListProducts
            | Self::SoldItems
            | Self::DeleteSeller => Role::Seller,
            _ => Role::Buyer,
        }
    }

    /// Whether the command needs a live session.
    ///
    /// Only account creation and login run without one.
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        !matches!(
            self,
            Self::CreateBuyer | Self::BuyerLogin | Self::CreateSeller | Self::SellerLogin
        )
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned for an unknown command code.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown command code: {0}")]
pub struct UnknownCommand(pub String);

impl std::str::FromStr for CommandCode {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .find(|c| c.code().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| UnknownCommand(s.to_owned()))
    }
}

impl TryFrom<String> for CommandCode {
    type Error = UnknownCommand;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CommandCode> for String {
    fn from(code: CommandCode) -> Self {
        code.code().to_owned()
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// One client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Session token; absent before login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SessionToken>,
    /// Operation to run.
    pub command: CommandCode,
    /// Command arguments, decoded once the command is known.
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    /// Build a request without arguments.
    #[must_use]
    pub const fn new(command: CommandCode, token: Option<SessionToken>) -> Self {
        Self {
            token,
            command,
            payload: Value::Null,
        }
    }

    /// Build a request carrying a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn with_payload<T: Serialize>(
        command: CommandCode,
        token: Option<SessionToken>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            token,
            command,
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Outcome class of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
    /// Informational notice; the connection stays usable.
    Warning,
    /// The session is gone; the client should stop sending on this connection.
    Timeout,
}

/// Failure taxonomy shared by every surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedFrame,
    Unauthorized,
    Forbidden,
    InvalidArgument,
    NotFound,
    InsufficientStock,
    StoreUnavailable,
    PartialUpdate,
}

impl ErrorKind {
    /// Stable wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedFrame => "malformed_frame",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::InsufficientStock => "insufficient_stock",
            Self::StoreUnavailable => "store_unavailable",
            Self::PartialUpdate => "partial_update",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One server response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default)]
    pub error: Option<ErrorKind>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Response {
    /// Successful response carrying a result.
    #[must_use]
    pub fn ok(message: impl Into<String>, payload: Value) -> Self {
        Self {
            status: Status::Ok,
            error: None,
            message: message.into(),
            payload: Some(payload),
        }
    }

    /// Successful response without a result.
    #[must_use]
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            error: None,
            message: message.into(),
            payload: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            error: Some(kind),
            message: message.into(),
            payload: None,
        }
    }

    /// Informational notice.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: Status::Warning,
            error: None,
            message: message.into(),
            payload: None,
        }
    }

    /// Session-ended notice.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: Status::Timeout,
            error: Some(ErrorKind::Unauthorized),
            message: message.into(),
            payload: None,
        }
    }

    /// True for `Status::Ok`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Decode the result payload into a typed value.
    ///
    /// A missing payload decodes as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone().unwrap_or(Value::Null))
    }
}

// =============================================================================
// Command Payloads
// =============================================================================

/// Arguments for `B0` / `S0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signup {
    pub name: String,
    pub username: String,
    pub password: String,
}

/// Arguments for `B1` / `S1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginGranted {
    pub token: SessionToken,
    pub user_id: AccountId,
    pub role: Role,
}

/// Arguments for `B3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub category: Category,
    #[serde(default)]
    pub keywords: Keywords,
}

/// Arguments for `B4`, `B5` and `S6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuantity {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Arguments for `B9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub product_id: ProductId,
    pub liked: bool,
}

/// Arguments for `B10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub product_id: ProductId,
}

/// Arguments for `B12`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub name: String,
    pub card_number: String,
    /// `MM/YY`.
    pub expiry: String,
}

impl fmt::Debug for PaymentDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentDetails")
            .field("name", &self.name)
            .field("card_number", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Arguments for `S4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub keywords: Keywords,
    #[serde(default)]
    pub condition: Condition,
    pub sale_price: Price,
    pub quantity: u32,
}

/// Arguments for `S5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    pub product_id: ProductId,
    pub sale_price: Price,
}
