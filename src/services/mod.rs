// Order data adapters
pub mod address_normalizer;
pub mod line_items;

// Lifecycle and funding
pub mod funding_gate;
pub mod funding_ledger;
pub mod order_state;

// Submission
pub mod fulfillment_pipeline;
pub mod fulfillment_submitter;

// Side effects
pub mod notifications;
pub mod wishlist;

// Auto-gifting
pub mod recommendations;
