use crate::{
    db::DbPool,
    entities::notification::{self, Entity as NotificationEntity, NotificationStatus},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub mod event_types {
    pub const ORDER_DELAYED_FUNDING: &str = "order_delayed_funding";
    pub const ORDER_REQUIRES_ATTENTION: &str = "order_requires_attention";
    pub const WISHLIST_ITEM_PURCHASED: &str = "wishlist_item_purchased";
}

/// Writes rows to the outbound email queue. Delivery belongs to the mailer.
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DbPool>,
}

impl NotificationService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub async fn enqueue(
        &self,
        recipient_email: &str,
        event_type: &str,
        variables: Value,
    ) -> Result<Uuid, ServiceError> {
        let id = Uuid::new_v4();
        let row = notification::ActiveModel {
            id: Set(id),
            recipient_email: Set(recipient_email.to_string()),
            event_type: Set(event_type.to_string()),
            variables: Set(variables),
            status: Set(NotificationStatus::Pending),
            created_at: Set(Utc::now()),
        };
        NotificationEntity::insert(row)
            .exec_without_returning(&*self.db)
            .await?;
        info!(notification_id = %id, event_type, "Notification queued");
        Ok(id)
    }

    /// Like [`enqueue`](Self::enqueue) but only logs failures; a lost email
    /// must never fail the order transition that triggered it.
    pub async fn enqueue_best_effort(&self, recipient_email: Option<&str>, event_type: &str, variables: Value) {
        let Some(recipient) = recipient_email.filter(|r| !r.trim().is_empty()) else {
            info!(event_type, "No recipient for notification, skipping");
            return;
        };
        if let Err(e) = self.enqueue(recipient, event_type, variables).await {
            error!(event_type, error = %e, "Failed to queue notification");
        }
    }

    pub async fn pending_for(&self, recipient_email: &str) -> Result<Vec<notification::Model>, ServiceError> {
        Ok(NotificationEntity::find()
            .filter(notification::Column::RecipientEmail.eq(recipient_email))
            .filter(notification::Column::Status.eq(NotificationStatus::Pending))
            .order_by_asc(notification::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
