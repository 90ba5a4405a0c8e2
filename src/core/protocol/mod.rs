// src/core/protocol/mod.rs

pub mod frame;
pub mod query;
pub mod response;

pub use frame::{QueryFrame, QueryFrameCodec, ResponseFrame};
pub use response::{ResponseType, WireResponse};
