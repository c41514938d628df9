//! Builds the vendor purchase request for an order and submits it.

use crate::{
    config::AppConfig,
    entities::order,
    metrics::VENDOR_ERRORS,
    services::{address_normalizer::CanonicalAddress, line_items::ExtractedItems},
    vendor::{
        FulfillmentVendor, VendorError, VendorOrderRequest, VendorOrderResponse, VendorProduct,
        VendorShippingAddress,
    },
    webhooks::callback_urls,
};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const SHIPPING_METHOD: &str = "cheapest";

#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub retailer: String,
    /// Fractional buffer on the product subtotal, e.g. `0.10`.
    pub max_price_buffer_pct: Decimal,
    /// Flat allowance for shipping and tax.
    pub max_price_allowance: Decimal,
    pub webhook_base_url: String,
}

impl Default for SubmitterSettings {
    fn default() -> Self {
        Self {
            retailer: "amazon".to_string(),
            max_price_buffer_pct: dec!(0.10),
            max_price_allowance: dec!(10.00),
            webhook_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl From<&AppConfig> for SubmitterSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            retailer: cfg.vendor_retailer.clone(),
            max_price_buffer_pct: cfg.max_price_buffer_pct,
            max_price_allowance: cfg.max_price_allowance,
            webhook_base_url: cfg.webhook_base_url.clone(),
        }
    }
}

/// Everything needed to build a request besides the order row itself.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionContext<'a> {
    pub items: &'a ExtractedItems,
    pub address: &'a CanonicalAddress,
    pub purchaser_display_name: Option<&'a str>,
    pub webhook_token: &'a str,
}

#[derive(Clone)]
pub struct FulfillmentSubmitter {
    vendor: Arc<dyn FulfillmentVendor>,
    settings: SubmitterSettings,
}

impl FulfillmentSubmitter {
    pub fn new(vendor: Arc<dyn FulfillmentVendor>, settings: SubmitterSettings) -> Self {
        Self { vendor, settings }
    }

    pub fn settings(&self) -> &SubmitterSettings {
        &self.settings
    }

    /// Ceiling in cents: `subtotal * (1 + buffer) + allowance`.
    ///
    /// Items without a price fall back to the order total as the subtotal.
    pub fn max_price_cents(&self, subtotal: Decimal, order_total: Decimal) -> i64 {
        let base = if subtotal > Decimal::ZERO {
            subtotal
        } else {
            order_total
        };
        let ceiling = base * (Decimal::ONE + self.settings.max_price_buffer_pct)
            + self.settings.max_price_allowance;
        (ceiling * dec!(100))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(i64::MAX)
    }

    pub fn build_request(&self, order: &order::Model, ctx: SubmissionContext<'_>) -> VendorOrderRequest {
        let products = ctx
            .items
            .items
            .iter()
            .map(|item| VendorProduct {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect();

        let (first_name, last_name) = ctx.address.split_name();
        let shipping_address = VendorShippingAddress {
            first_name,
            last_name,
            address_line1: ctx.address.address_line1.clone(),
            address_line2: ctx.address.address_line2.clone().unwrap_or_default(),
            zip_code: ctx.address.postal_code.clone(),
            city: ctx.address.city.clone(),
            state: ctx.address.state.clone(),
            country: ctx.address.country.clone(),
            phone_number: ctx.address.phone.clone().unwrap_or_default(),
        };

        let message = order
            .gift_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .or_else(|| ctx.items.first_gift_message());
        let is_gift = order.is_gift || ctx.items.any_gift_flag() || message.is_some();
        let gift_message = message.map(|m| sign_gift_message(m, ctx.purchaser_display_name));

        VendorOrderRequest {
            idempotency_key: order.id.to_string(),
            retailer: self.settings.retailer.clone(),
            products,
            max_price: self.max_price_cents(ctx.items.subtotal(), order.total_amount),
            shipping_address,
            shipping_method: SHIPPING_METHOD.to_string(),
            is_gift,
            gift_message,
            webhooks: callback_urls(&self.settings.webhook_base_url, order.id, ctx.webhook_token),
            client_notes: json!({
                "order_id": order.id,
                "order_number": order.order_number,
            }),
        }
    }

    #[instrument(skip(self, request), fields(order_id = %request.idempotency_key))]
    pub async fn submit(&self, request: &VendorOrderRequest) -> Result<VendorOrderResponse, VendorError> {
        match self.vendor.submit_order(request).await {
            Ok(response) => {
                info!(request_id = %response.request_id, "Vendor accepted order");
                Ok(response)
            }
            Err(e) => {
                VENDOR_ERRORS.with_label_values(&[e.kind()]).inc();
                warn!(error = %e, "Vendor submission failed");
                Err(e)
            }
        }
    }
}

fn sign_gift_message(message: &str, display_name: Option<&str>) -> String {
    match display_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} - From {}", message, name),
        None => message.to_string(),
    }
}
