//! "Someone bought your wishlist item" side effect.
//!
//! The pipeline only publishes a `wishlist.purchase_check` message; the
//! worker below consumes it off the submission path.

use crate::{
    db::DbPool,
    entities::{
        customer_profile::Entity as ProfileEntity,
        wishlist_item::{self, Entity as WishlistEntity},
    },
    errors::ServiceError,
    message_queue::{topics, MessageQueue},
    services::notifications::{event_types, NotificationService},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCheck {
    pub order_id: Uuid,
    pub purchaser_id: Uuid,
    /// Only these users' wishlists are checked.
    #[serde(default)]
    pub recipient_ids: Vec<Uuid>,
    pub product_ids: Vec<String>,
}

#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DbPool>,
    notifications: NotificationService,
}

impl WishlistService {
    pub fn new(db: Arc<DbPool>, notifications: NotificationService) -> Self {
        Self { db, notifications }
    }

    /// Marks the recipients' matching public, unpurchased items as bought by
    /// `check.order_id` and notifies their owners. Returns the ids of the
    /// items marked.
    pub async fn handle_purchase_check(&self, check: &PurchaseCheck) -> Result<Vec<Uuid>, ServiceError> {
        if check.product_ids.is_empty() || check.recipient_ids.is_empty() {
            return Ok(Vec::new());
        }

        let order_id = check.order_id;
        let product_ids = check.product_ids.clone();
        let recipient_ids = check.recipient_ids.clone();
        let marked = self
            .db
            .transaction::<_, Vec<wishlist_item::Model>, ServiceError>(move |txn| {
                Box::pin(async move {
                    let candidates = WishlistEntity::find()
                        .filter(wishlist_item::Column::OwnerId.is_in(recipient_ids))
                        .filter(wishlist_item::Column::ProductId.is_in(product_ids))
                        .filter(wishlist_item::Column::IsPublic.eq(true))
                        .filter(wishlist_item::Column::PurchasedAt.is_null())
                        .all(txn)
                        .await?;

                    let mut marked = Vec::with_capacity(candidates.len());
                    for item in candidates {
                        // Guarded so a concurrent check cannot mark the same item twice.
                        let result = WishlistEntity::update_many()
                            .col_expr(wishlist_item::Column::PurchasedAt, Expr::value(Some(Utc::now())))
                            .col_expr(wishlist_item::Column::PurchasedByOrderId, Expr::value(Some(order_id)))
                            .filter(wishlist_item::Column::Id.eq(item.id))
                            .filter(wishlist_item::Column::PurchasedAt.is_null())
                            .exec(txn)
                            .await?;
                        if result.rows_affected == 1 {
                            marked.push(item);
                        }
                    }
                    Ok(marked)
                })
            })
            .await?;

        for item in &marked {
            let owner = ProfileEntity::find_by_id(item.owner_id).one(&*self.db).await?;
            let email = owner.as_ref().and_then(|o| o.email.as_deref());
            self.notifications
                .enqueue_best_effort(
                    email,
                    event_types::WISHLIST_ITEM_PURCHASED,
                    json!({
                        "wishlist_item_id": item.id,
                        "product_id": item.product_id,
                        "title": item.title,
                        "owner_name": owner.as_ref().and_then(|o| o.display_name.clone()),
                    }),
                )
                .await;
        }

        if !marked.is_empty() {
            info!(order_id = %order_id, count = marked.len(), "Wishlist items marked purchased");
        }
        Ok(marked.into_iter().map(|i| i.id).collect())
    }
}

/// Polls the purchase-check topic until `shutdown` flips to true.
pub async fn run_purchase_check_worker(
    queue: Arc<dyn MessageQueue>,
    service: WishlistService,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(topic = topics::WISHLIST_PURCHASE_CHECK, "Wishlist worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.subscribe(topics::WISHLIST_PURCHASE_CHECK).await {
            Ok(Some(message)) => {
                let outcome = match serde_json::from_value::<PurchaseCheck>(message.payload.clone()) {
                    Ok(check) => service.handle_purchase_check(&check).await.map(|_| ()),
                    Err(e) => {
                        // Unparseable payloads will never succeed; ack and drop.
                        warn!(message_id = %message.id, error = %e, "Discarding malformed purchase check");
                        Ok(())
                    }
                };
                let ack = match outcome {
                    Ok(()) => queue.ack(&message.id).await,
                    Err(e) => {
                        error!(message_id = %message.id, error = %e, "Purchase check failed");
                        queue.nack(&message.id).await
                    }
                };
                if let Err(e) = ack {
                    error!(message_id = %message.id, error = %e, "Failed to settle message");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read purchase-check queue");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
    debug!("Wishlist worker stopped");
}
