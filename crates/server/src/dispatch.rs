//! Command dispatcher.
//!
//! Turns one decoded [`Request`] into one [`Response`]:
//! decode the typed payload, authenticate, check the declared role, run the
//! bound service call and encode its result. Any failure ends the request
//! early with an error response. No business logic lives here.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use marketplace_core::codec::MalformedFrame;
use marketplace_core::protocol::{
    CommandCode, Credentials, Feedback, NewProduct, PaymentDetails, PriceChange, ProductQuantity,
    ProductRef, Request, Response, SearchQuery, Signup,
};
use marketplace_core::{BuyerId, Role, SellerId, SessionToken};

use crate::db::SaleRemoval;
use crate::error::{AppError, Result};
use crate::models::Session;
use crate::services::Services;

/// What a command did to the caller's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// No session was involved.
    Unchanged,
    /// This token is live after the command.
    Active(SessionToken),
    /// The session is gone (logout, account deletion or expiry).
    Ended,
}

/// A response and its effect on the caller's session.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub response: Response,
    pub session: SessionChange,
}

impl Dispatched {
    const fn unchanged(response: Response) -> Self {
        Self {
            response,
            session: SessionChange::Unchanged,
        }
    }
}

/// Routes commands to services.
#[derive(Clone)]
pub struct Dispatcher {
    services: Services,
}

/// An authenticated caller.
struct Caller {
    token: SessionToken,
    session: Session,
}

impl Caller {
    fn buyer(&self) -> Result<BuyerId> {
        self.session
            .buyer_id()
            .ok_or_else(|| AppError::Forbidden("Buyer session required".to_string()))
    }

    fn seller(&self) -> Result<SellerId> {
        self.session
            .seller_id()
            .ok_or_else(|| AppError::Forbidden("Seller session required".to_string()))
    }

    fn respond(&self, response: Response) -> Dispatched {
        Dispatched {
            response,
            session: SessionChange::Active(self.token.clone()),
        }
    }

    const fn ended(response: Response) -> Dispatched {
        Dispatched {
            response,
            session: SessionChange::Ended,
        }
    }
}

impl Dispatcher {
    #[must_use]
    pub const fn new(services: Services) -> Self {
        Self { services }
    }

    /// The services commands are routed to.
    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// Handle one frame as delivered by the codec.
    pub async fn dispatch_frame(
        &self,
        frame: std::result::Result<Request, MalformedFrame>,
    ) -> Dispatched {
        match frame {
            Ok(request) => self.dispatch(request).await,
            Err(malformed) => {
                tracing::debug!(reason = %malformed.reason, "Malformed frame");
                Dispatched::unchanged(AppError::from(malformed).to_response())
            }
        }
    }

    /// Handle one request.
    #[tracing::instrument(skip_all, fields(command = %request.command))]
    pub async fn dispatch(&self, request: Request) -> Dispatched {
        match self.route(request).await {
            Ok(dispatched) => {
                tracing::debug!("Command succeeded");
                dispatched
            }
            Err(err) => {
                tracing::debug!(error = %err, kind = %err.kind(), "Command failed");
                let response = err.to_response();
                if matches!(err, AppError::SessionExpired) {
                    Caller::ended(response)
                } else {
                    Dispatched::unchanged(response)
                }
            }
        }
    }

    async fn route(&self, request: Request) -> Result<Dispatched> {
        let Request {
            token,
            command,
            payload,
        } = request;

        if !command.requires_auth() {
            return self.public(command, payload).await;
        }
        let caller = self.authorize(command, token).await?;
        self.authenticated(command, payload, &caller).await
    }

    /// Resolve the token and check it against the command's declared role.
    async fn authorize(&self, command: CommandCode, token: Option<SessionToken>) -> Result<Caller> {
        let token = token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Login required".to_string()))?;
        let session = self.services.sessions.resolve(&token).await?;

        let required = command.declared_role();
        if session.role != required {
            return Err(AppError::Forbidden(format!(
                "{command} requires a {required} session"
            )));
        }
        Ok(Caller { token, session })
    }

    async fn public(&self, command: CommandCode, payload: Value) -> Result<Dispatched> {
        let services = &self.services;
        let dispatched = match command {
            CommandCode::CreateBuyer => {
                let signup: Signup = decode(command, payload)?;
                let buyer = services.accounts.create_buyer(&signup).await?;
                Dispatched::unchanged(ok("Buyer account created", &buyer))
            }
            CommandCode::CreateSeller => {
                let signup: Signup = decode(command, payload)?;
                let seller = services.accounts.create_seller(&signup).await?;
                Dispatched::unchanged(ok("Seller account created", &seller))
            }
            CommandCode::BuyerLogin | CommandCode::SellerLogin => {
                let credentials: Credentials = decode(command, payload)?;
                let granted = if command.declared_role() == Role::Buyer {
                    services.accounts.login_buyer(&credentials).await?
                } else {
                    services.accounts.login_seller(&credentials).await?
                };
                Dispatched {
                    response: ok("Logged in", &granted),
                    session: SessionChange::Active(granted.token),
                }
            }
            _ => {
                return Err(AppError::Unauthorized("Login required".to_string()));
            }
        };
        Ok(dispatched)
    }

    async fn authenticated(
        &self,
        command: CommandCode,
        payload: Value,
        caller: &Caller,
    ) -> Result<Dispatched> {
        let services = &self.services;
        let response = match command {
            // Buyer
            CommandCode::BuyerLogout | CommandCode::SellerLogout => {
                services.accounts.logout(&caller.token).await?;
                return Ok(Caller::ended(Response::done("Logged out")));
            }
            CommandCode::SearchProducts => {
                let query: SearchQuery = decode(command, payload)?;
                ok("Search results", &services.catalog.search(&query).await?)
            }
            CommandCode::AddToCart => {
                let args: ProductQuantity = decode(command, payload)?;
                let item = services
                    .carts
                    .add(caller.buyer()?, args.product_id, args.quantity)
                    .await?;
                ok("Added to cart", &item)
            }
            CommandCode::RemoveFromCart => {
                let args: ProductQuantity = decode(command, payload)?;
                match services
                    .carts
                    .remove(caller.buyer()?, args.product_id, args.quantity)
                    .await?
                {
                    Some(item) => ok("Cart quantity reduced", &item),
                    None => Response::done("Removed from cart"),
                }
            }
            CommandCode::SaveCart => ok("Cart saved", &services.carts.save(caller.buyer()?).await?),
            CommandCode::ClearCart => {
                let removed = services.carts.clear(caller.buyer()?).await?;
                Response::done(format!("Cart cleared ({removed} items removed)"))
            }
            CommandCode::ViewCart => ok("Cart", &services.carts.view(caller.buyer()?).await?),
            CommandCode::ProvideFeedback => {
                let feedback: Feedback = decode(command, payload)?;
                let applied = services
                    .ratings
                    .apply_feedback(caller.buyer()?, feedback.product_id, feedback.liked)
                    .await?;
                ok("Feedback recorded", &applied)
            }
            CommandCode::SellerRatingForProduct => {
                let args: ProductRef = decode(command, payload)?;
                ok(
                    "Seller rating",
                    &services.catalog.seller_rating_for(args.product_id).await?,
                )
            }
            CommandCode::PurchaseHistory => ok(
                "Purchase history",
                &services.ledger.by_buyer(caller.buyer()?).await?,
            ),
            CommandCode::Checkout => {
                let payment: PaymentDetails = decode(command, payload)?;
                let receipt = services
                    .ledger
                    .checkout(caller.buyer()?, &payment)
                    .await?;
                ok("Purchase complete", &receipt)
            }
            CommandCode::DeleteBuyer => {
                services.accounts.delete_buyer(caller.buyer()?).await?;
                return Ok(Caller::ended(Response::done("Buyer account deleted")));
            }

            // Seller
            CommandCode::SellerRating => ok(
                "Seller rating",
                &services.accounts.seller_rating(caller.seller()?).await?,
            ),
            CommandCode::CreateProduct => {
                let listing: NewProduct = decode(command, payload)?;
                let product = services
                    .catalog
                    .create_product(caller.seller()?, &listing)
                    .await?;
                ok("Product listed", &product)
            }
            CommandCode::ChangeSalePrice => {
                let change: PriceChange = decode(command, payload)?;
                ok(
                    "Sale price updated",
                    &services.catalog.change_price(caller.seller()?, change).await?,
                )
            }
            CommandCode::RemoveFromSale => {
                let args: ProductQuantity = decode(command, payload)?;
                match services
                    .catalog
                    .remove_from_sale(caller.seller()?, args.product_id, args.quantity)
                    .await?
                {
                    SaleRemoval::Reduced(product) => ok("Quantity removed from sale", &product),
                    SaleRemoval::Deleted => Response::done("Product removed from sale"),
                }
            }
            CommandCode::ListProducts => ok(
                "Products",
                &services.catalog.list_own(caller.seller()?).await?,
            ),
            CommandCode::SoldItems => ok(
                "Sold items",
                &services.catalog.sold_items(caller.seller()?).await?,
            ),
            CommandCode::DeleteSeller => {
                services.accounts.delete_seller(caller.seller()?).await?;
                return Ok(Caller::ended(Response::done("Seller account deleted")));
            }

            CommandCode::CreateBuyer
            | CommandCode::BuyerLogin
            | CommandCode::CreateSeller
            | CommandCode::SellerLogin => return self.public(command, payload).await,
        };
        Ok(caller.respond(response))
    }
}

/// Decode a command's payload.
fn decode<T: DeserializeOwned>(command: CommandCode, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::MalformedFrame(format!("invalid payload for {command}: {e}")))
}

/// Successful response with a serialized result.
fn ok<T: Serialize>(message: &str, payload: &T) -> Response {
    match serde_json::to_value(payload) {
        Ok(value) => Response::ok(message, value),
        Err(err) => {
            tracing::error!(error = %err, "Response payload could not be serialized");
            Response::done(message)
        }
    }
}
