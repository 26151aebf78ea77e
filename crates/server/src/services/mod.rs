//! Business logic.
//!
//! Services hold `Arc` handles to the stores they use and are cheap to clone.
//! [`Services`] wires them together once at start-up.

pub mod accounts;
pub mod cart;
pub mod catalog;
pub mod ledger;
pub mod payment;
pub mod ratings;
pub mod sessions;

use std::sync::Arc;

pub use accounts::AccountService;
pub use cart::CartEngine;
pub use catalog::CatalogService;
pub use ledger::TransactionLedger;
pub use payment::{LocalGateway, PaymentGateway};
pub use ratings::{FeedbackApplied, RatingAggregator};
pub use sessions::{SessionError, SessionRegistry};

use crate::config::SessionConfig;
use crate::db::Stores;

/// Every service, built over one set of stores.
#[derive(Clone)]
pub struct Services {
    pub sessions: SessionRegistry,
    pub accounts: AccountService,
    pub catalog: CatalogService,
    pub carts: CartEngine,
    pub ledger: TransactionLedger,
    pub ratings: RatingAggregator,
}

impl Services {
    /// Wire services with the local payment gateway.
    #[must_use]
    pub fn new(stores: Stores, session: SessionConfig) -> Self {
        Self::with_gateway(stores, session, Arc::new(LocalGateway))
    }

    /// Wire services with a specific payment gateway.
    #[must_use]
    pub fn with_gateway(
        stores: Stores,
        session: SessionConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let sessions = SessionRegistry::new(stores.sessions.clone(), session.ttl);
        let carts = CartEngine::new(stores.carts.clone(), stores.catalog.clone());
        let ledger = TransactionLedger::new(
            stores.transactions.clone(),
            stores.catalog.clone(),
            stores.carts.clone(),
            stores.accounts.clone(),
            carts.clone(),
            gateway,
        );
        let ratings = RatingAggregator::new(
            stores.catalog.clone(),
            stores.accounts.clone(),
            ledger.clone(),
        );
        let catalog = CatalogService::new(
            stores.catalog.clone(),
            stores.accounts.clone(),
            ledger.clone(),
        );
        let accounts = AccountService::new(
            stores.accounts,
            stores.catalog,
            stores.carts,
            sessions.clone(),
            carts.clone(),
            ledger.clone(),
        );

        Self {
            sessions,
            accounts,
            catalog,
            carts,
            ledger,
            ratings,
        }
    }
}
