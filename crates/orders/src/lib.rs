//! Orders domain module.
//!
//! Pure order rules: the status lifecycle, pricing of lines captured at order
//! time, normalization of free-form annotations and request validation. No IO;
//! the fulfillment services in `cafeflow-infra` drive these types inside a
//! store unit of work.

pub mod order;
pub mod request;
pub mod status;

pub use order::{Order, OrderDraft, OrderItem, OrderStatusHistory};
pub use request::{CreateOrderItem, CreateOrderRequest, UpdateOrderRequest, normalize_annotations};
pub use status::OrderStatus;
