//! Account service.
//!
//! Signup, login and logout for both roles, the seller rating lookup and
//! account deletion with its cascade.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use marketplace_core::protocol::{Credentials, LoginGranted, Signup};
use marketplace_core::{AccountId, BuyerId, Role, SellerId, SessionToken};

use crate::db::{AccountStore, CartStore, CatalogStore, RepositoryError};
use crate::error::{AppError, Result, StoreContext};
use crate::models::{Buyer, NewAccount, Seller, SellerRating};

use super::cart::CartEngine;
use super::ledger::TransactionLedger;
use super::sessions::SessionRegistry;

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Buyer and seller account management.
#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    catalog: Arc<dyn CatalogStore>,
    carts: Arc<dyn CartStore>,
    sessions: SessionRegistry,
    cart_engine: CartEngine,
    ledger: TransactionLedger,
}

impl AccountService {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        catalog: Arc<dyn CatalogStore>,
        carts: Arc<dyn CartStore>,
        sessions: SessionRegistry,
        cart_engine: CartEngine,
        ledger: TransactionLedger,
    ) -> Self {
        Self {
            accounts,
            catalog,
            carts,
            sessions,
            cart_engine,
            ledger,
        }
    }

    // =========================================================================
    // Signup
    // =========================================================================

    /// Create a buyer account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for blank fields, a short password or a
    /// taken username.
    #[tracing::instrument(skip_all, fields(username = %signup.username))]
    pub async fn create_buyer(&self, signup: &Signup) -> Result<Buyer> {
        let account = new_account(signup)?;
        let buyer = self
            .accounts
            .create_buyer(account)
            .await
            .map_err(|err| signup_error("buyer", err))?;
        tracing::info!(buyer_id = %buyer.id, "Buyer account created");
        Ok(buyer)
    }

    /// Create a seller account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for blank fields, a short password or a
    /// taken username.
    #[tracing::instrument(skip_all, fields(username = %signup.username))]
    pub async fn create_seller(&self, signup: &Signup) -> Result<Seller> {
        let account = new_account(signup)?;
        let seller = self
            .accounts
            .create_seller(account)
            .await
            .map_err(|err| signup_error("seller", err))?;
        tracing::info!(seller_id = %seller.id, "Seller account created");
        Ok(seller)
    }

    // =========================================================================
    // Login / Logout
    // =========================================================================

    /// Check buyer credentials and start a session.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for an unknown username or wrong password.
    #[tracing::instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login_buyer(&self, credentials: &Credentials) -> Result<LoginGranted> {
        let (buyer, hash) = self
            .accounts
            .buyer_password_hash(credentials.username.trim())
            .await
            .store_context("buyer", "load")?
            .ok_or_else(invalid_credentials)?;
        verify_password(&credentials.password, &hash)?;
        self.grant(buyer.id.into(), Role::Buyer).await
    }

    /// Check seller credentials and start a session.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for an unknown username or wrong password.
    #[tracing::instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login_seller(&self, credentials: &Credentials) -> Result<LoginGranted> {
        let (seller, hash) = self
            .accounts
            .seller_password_hash(credentials.username.trim())
            .await
            .store_context("seller", "load")?
            .ok_or_else(invalid_credentials)?;
        verify_password(&credentials.password, &hash)?;
        self.grant(seller.id.into(), Role::Seller).await
    }

    async fn grant(&self, user_id: AccountId, role: Role) -> Result<LoginGranted> {
        let token = self.sessions.create(user_id, role).await?;
        tracing::info!(%user_id, %role, "Login succeeded");
        Ok(LoginGranted {
            token,
            user_id,
            role,
        })
    }

    /// End the presented session.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the session store fails.
    pub async fn logout(&self, token: &SessionToken) -> Result<()> {
        self.sessions.revoke(token).await?;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// A seller's rating pair and items sold.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the seller no longer exists.
    pub async fn seller_rating(&self, seller: SellerId) -> Result<SellerRating> {
        self.accounts
            .get_seller(seller)
            .await
            .store_context("seller", "load")?
            .map(SellerRating::from)
            .ok_or_else(|| AppError::NotFound("Seller not found".to_string()))
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete a buyer with their sessions, purchase history and cart.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the buyer is already gone, or `StoreUnavailable`.
    #[tracing::instrument(skip(self), fields(buyer_id = %buyer))]
    pub async fn delete_buyer(&self, buyer: BuyerId) -> Result<()> {
        self.sessions.revoke_all_for(buyer.into()).await?;
        {
            let _guard = self.cart_engine.lock(buyer).await;
            let transactions = self.ledger.delete_by_buyer(buyer).await?;
            self.carts
                .delete_cart_for_buyer(buyer)
                .await
                .store_context("cart", "delete")?;
            tracing::debug!(transactions, "Buyer history removed");
        }

        let deleted = self
            .accounts
            .delete_buyer(buyer)
            .await
            .store_context("buyer", "delete")?;
        if !deleted {
            return Err(AppError::NotFound("Buyer not found".to_string()));
        }
        tracing::info!("Buyer account deleted");
        Ok(())
    }

    /// Delete a seller with their sessions, products and sales.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the seller is already gone, or `StoreUnavailable`.
    #[tracing::instrument(skip(self), fields(seller_id = %seller))]
    pub async fn delete_seller(&self, seller: SellerId) -> Result<()> {
        self.sessions.revoke_all_for(seller.into()).await?;
        let products = self
            .catalog
            .delete_products_by_seller(seller)
            .await
            .store_context("product", "delete")?;
        let transactions = self.ledger.delete_by_seller(seller).await?;
        tracing::debug!(products, transactions, "Seller listings removed");

        let deleted = self
            .accounts
            .delete_seller(seller)
            .await
            .store_context("seller", "delete")?;
        if !deleted {
            return Err(AppError::NotFound("Seller not found".to_string()));
        }
        tracing::info!("Seller account deleted");
        Ok(())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Validate signup fields and hash the password.
fn new_account(signup: &Signup) -> Result<NewAccount> {
    let name = required("name", &signup.name)?;
    let username = required("username", &signup.username)?;
    validate_password(&signup.password)?;
    Ok(NewAccount {
        name,
        username,
        password_hash: hash_password(&signup.password)?,
    })
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidArgument(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Validate password requirements.
fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::InvalidArgument(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Hash a password using Argon2.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            AppError::InvalidArgument("password could not be processed".to_string())
        })
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<()> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| invalid_credentials())?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid_credentials())
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid username or password".to_string())
}

/// A duplicate username is the client's problem, anything else the store's.
fn signup_error(entity: &'static str, err: RepositoryError) -> AppError {
    match err {
        RepositoryError::Conflict(_) => {
            AppError::InvalidArgument("username already taken".to_string())
        }
        other => AppError::store(entity, "create", other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::Services;
    use crate::db::Stores;
    use crate::config::SessionConfig;

    fn signup(username: &str, password: &str) -> Signup {
        Signup {
            name: "Ada Lovelace".to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn credentials(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn services() -> Services {
        Services::new(Stores::memory(), SessionConfig::default())
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).is_ok());
        assert!(verify_password("wrong horse", &hash).is_err());
    }

    #[test]
    fn test_validate_password_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("longenough").is_ok());
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let services = services();
        let buyer = services
            .accounts
            .create_buyer(&signup("ada", "password1"))
            .await
            .unwrap();

        let granted = services
            .accounts
            .login_buyer(&credentials("ada", "password1"))
            .await
            .unwrap();

        assert_eq!(granted.user_id, AccountId::from(buyer.id));
        assert_eq!(granted.role, Role::Buyer);
        let session = services.sessions.resolve(&granted.token).await.unwrap();
        assert_eq!(session.buyer_id(), Some(buyer.id));
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let services = services();
        services
            .accounts
            .create_seller(&signup("shop", "password1"))
            .await
            .unwrap();

        let err = services
            .accounts
            .create_seller(&signup("shop", "password2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(ref m) if m == "username already taken"));
    }

    #[tokio::test]
    async fn test_same_username_per_role() {
        let services = services();
        services
            .accounts
            .create_buyer(&signup("sam", "password1"))
            .await
            .unwrap();
        assert!(
            services
                .accounts
                .create_seller(&signup("sam", "password1"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_blank_fields_rejected() {
        let services = services();
        let mut blank = signup("ada", "password1");
        blank.name = "   ".to_string();
        assert!(matches!(
            services.accounts.create_buyer(&blank).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            services.accounts.create_buyer(&signup("ada", "short")).await,
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_login_unauthorized() {
        let services = services();
        services
            .accounts
            .create_buyer(&signup("ada", "password1"))
            .await
            .unwrap();

        assert!(matches!(
            services
                .accounts
                .login_buyer(&credentials("ada", "password2"))
                .await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            services
                .accounts
                .login_buyer(&credentials("nobody", "password1"))
                .await,
            Err(AppError::Unauthorized(_))
        ));
        // Buyer credentials do not open a seller session.
        assert!(matches!(
            services
                .accounts
                .login_seller(&credentials("ada", "password1"))
                .await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes() {
        let services = services();
        services
            .accounts
            .create_seller(&signup("shop", "password1"))
            .await
            .unwrap();
        let granted = services
            .accounts
            .login_seller(&credentials("shop", "password1"))
            .await
            .unwrap();

        services.accounts.logout(&granted.token).await.unwrap();

        assert!(services.sessions.resolve(&granted.token).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_seller_cascades() {
        let services = services();
        let seller = services
            .accounts
            .create_seller(&signup("shop", "password1"))
            .await
            .unwrap();
        let granted = services
            .accounts
            .login_seller(&credentials("shop", "password1"))
            .await
            .unwrap();
        services
            .catalog
            .create_product(
                seller.id,
                &marketplace_core::protocol::NewProduct {
                    name: "Desk".to_string(),
                    category: marketplace_core::Category::Three,
                    keywords: marketplace_core::Keywords::default(),
                    condition: marketplace_core::Condition::Used,
                    sale_price: "40".parse().unwrap(),
                    quantity: 1,
                },
            )
            .await
            .unwrap();

        services.accounts.delete_seller(seller.id).await.unwrap();

        assert!(services.sessions.resolve(&granted.token).await.is_err());
        assert!(services.catalog.list_own(seller.id).await.unwrap().is_empty());
        assert!(matches!(
            services.accounts.seller_rating(seller.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            services.accounts.delete_seller(seller.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_buyer_cascades() {
        let services = services();
        let buyer = services
            .accounts
            .create_buyer(&signup("ada", "password1"))
            .await
            .unwrap();

        services.accounts.delete_buyer(buyer.id).await.unwrap();

        assert!(matches!(
            services
                .accounts
                .login_buyer(&credentials("ada", "password1"))
                .await,
            Err(AppError::Unauthorized(_))
        ));
        // The username is free again.
        assert!(
            services
                .accounts
                .create_buyer(&signup("ada", "password1"))
                .await
                .is_ok()
        );
    }
}
