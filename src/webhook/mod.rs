pub mod handlers;
pub mod normalize;

pub use handlers::router;
pub use normalize::InboundMessage;
