//! Wire objects shared between the Haulage dispatch engine and its collaborators.
//!
//! The engine keeps its own strongly typed enums internally; the types in
//! [`objects`] are the serialized form used on notification webhooks, inbound
//! payment webhooks and anything else that leaves the process.

pub mod objects;
pub mod signature;
