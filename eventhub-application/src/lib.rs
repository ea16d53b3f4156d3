pub mod context;
pub mod dto;
pub mod error;
pub mod handler;
pub mod request;

pub use handler::{RequestHandler, SyncRequestHandler};
