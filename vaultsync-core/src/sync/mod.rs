//! Synchronization engine: the HTTP client and the per-entity managers
//! that reconcile encrypted models with the server.
//!
//! - [`client`]: msgpack-framed transport, auth header, error mapping
//! - [`collections`] / [`items`]: optimistic-concurrency upload, batch and
//!   transaction semantics, revision history, chunk transfer
//! - [`invitations`] / [`members`]: sharing and membership
//! - [`options`]: query options for list/fetch calls

pub mod client;
pub mod collections;
pub mod invitations;
pub mod items;
pub mod members;
pub mod models;
pub mod options;

pub use client::Client;
pub use collections::{Collection, CollectionListResponse, CollectionManager};
pub use invitations::CollectionInvitationManager;
pub use items::{Item, ItemListResponse, ItemManager};
pub use members::MemberManager;
pub use options::{FetchOptions, PrefetchOption};
