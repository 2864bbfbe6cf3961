//! Protocol module containing the frame codec, request builders and ids.

pub mod event;
pub mod frame;
pub mod request;
pub mod transaction;

pub use frame::{decode_frame, encode_request, Body, ParseError, ParsedFrame};
pub use request::{Method, Request};
pub use transaction::{SubscriptionId, TransactionId, TransactionIdGenerator};
