//! crates/reader_core/src/entitlement.rs
//!
//! Decides whether a reader may see a book's full content, and records
//! purchases exactly once per (user, book).

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{BookId, Entitlement, UserId};
use crate::ports::{DatabaseService, InsertOutcome, PortError, PortResult};

/// The answer to "may this actor read the whole book?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub granted: bool,
    pub entitlement: Option<Entitlement>,
}

impl AccessDecision {
    fn denied() -> Self {
        Self {
            granted: false,
            entitlement: None,
        }
    }
}

/// What a purchase attempt amounted to. Store failures are reported separately
/// as `Err(PortError)`; everything here is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "entitlement", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// A new entitlement was recorded.
    Granted(Entitlement),
    /// The user already owned the book; this is the existing entitlement.
    AlreadyOwned(Entitlement),
    /// There is no signed-in user to buy for.
    Unauthenticated,
}

impl PurchaseOutcome {
    pub fn entitlement(&self) -> Option<&Entitlement> {
        match self {
            PurchaseOutcome::Granted(e) | PurchaseOutcome::AlreadyOwned(e) => Some(e),
            PurchaseOutcome::Unauthenticated => None,
        }
    }
}

#[derive(Clone)]
pub struct EntitlementGate {
    db: Arc<dyn DatabaseService>,
}

impl EntitlementGate {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Looks up the user's entitlement. An anonymous caller is denied without
    /// touching the store.
    pub async fn check_access(
        &self,
        user_id: Option<UserId>,
        book_id: BookId,
    ) -> PortResult<AccessDecision> {
        let Some(user_id) = user_id else {
            debug!(%book_id, "Access check for anonymous reader denied");
            return Ok(AccessDecision::denied());
        };

        let entitlement = self.db.find_entitlement(user_id, book_id).await?;
        Ok(AccessDecision {
            granted: entitlement.is_some(),
            entitlement,
        })
    }

    /// Records a purchase. Buying a book twice returns the existing entitlement
    /// rather than failing, including when two purchases race each other.
    pub async fn purchase(
        &self,
        user_id: Option<UserId>,
        book_id: BookId,
        amount: i64,
        currency: &str,
    ) -> PortResult<PurchaseOutcome> {
        let Some(user_id) = user_id else {
            return Ok(PurchaseOutcome::Unauthenticated);
        };

        let candidate = Entitlement {
            user_id,
            book_id,
            granted_at: Utc::now(),
            amount,
            currency: currency.to_string(),
        };

        match self.db.insert_entitlement(candidate).await? {
            InsertOutcome::Inserted(entitlement) => {
                info!(%user_id, %book_id, amount, currency, "Entitlement granted");
                Ok(PurchaseOutcome::Granted(entitlement))
            }
            InsertOutcome::Conflict => {
                let existing = self.db.find_entitlement(user_id, book_id).await?.ok_or_else(|| {
                    PortError::Unexpected(format!(
                        "Entitlement for user {} and book {} conflicted but could not be read back",
                        user_id, book_id
                    ))
                })?;
                info!(%user_id, %book_id, "Purchase of an already owned book");
                Ok(PurchaseOutcome::AlreadyOwned(existing))
            }
        }
    }

    /// Every entitlement the user holds, newest first.
    pub async fn library(&self, user_id: UserId) -> PortResult<Vec<Entitlement>> {
        let mut owned = self.db.list_entitlements(user_id).await?;
        owned.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));
        Ok(owned)
    }
}
