//! VaultSync Client Core
//!
//! End-to-end encrypted synchronization of hierarchical user data: an
//! [`Account`] owns collections, collections own items, and every byte of
//! metadata and content is sealed on the client before it leaves the
//! device. The server orders, stores, and access-controls opaque
//! ciphertext; it can never read any of it.
//!
//! ```no_run
//! use vaultsync_core::{Account, Client, User};
//!
//! # async fn example() -> vaultsync_core::Result<()> {
//! let client = Client::new("https://sync.example.com")?;
//! let user = User {
//!     username: "alice".to_string(),
//!     email: "alice@example.com".to_string(),
//! };
//! let account = Account::signup(client, &user, "correct horse battery staple").await?;
//!
//! let collections = account.collection_manager()?;
//! let mut collection = collections.create("notes", b"{\"name\":\"Notes\"}", b"")?;
//! collections.upload(&mut collection, None).await?;
//!
//! let items = collections.item_manager(&collection)?;
//! let mut item = items.create(b"{\"name\":\"today\"}", b"hello")?;
//! items.batch(&mut [&mut item], None, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod crypto;
pub mod error;
pub mod models;
pub mod sync;

pub use account::Account;
pub use crypto::primitives::pretty_fingerprint;
pub use error::{Error, Result};
pub use models::{AccessLevel, ItemMetadata, SignedInvitation};
pub use sync::client::Client;
pub use sync::collections::{Collection, CollectionListResponse, CollectionManager};
pub use sync::invitations::{CollectionInvitationManager, InvitationListResponse};
pub use sync::items::{Item, ItemListResponse, ItemManager, RevisionListResponse};
pub use sync::members::{MemberListResponse, MemberManager};
pub use sync::models::{CollectionMember, User, UserProfile};
pub use sync::options::{FetchOptions, PrefetchOption};

/// Scheme version stored in account records and every encrypted entity.
/// Entities carrying any other version are refused before their key
/// material is touched.
pub const CURRENT_VERSION: u8 = 1;
