pub mod customer_profile;
pub mod funding_pool;
pub mod funding_reservation;
pub mod notification;
pub mod order;
pub mod order_note;
pub mod wishlist_item;

pub use order::{FundingStatus, OrderStatus, PaymentStatus};
pub use order_note::NoteKind;
