//! Session and identity management for Cadenza.
//!
//! This crate owns the lifecycle of player connections:
//!
//! 1. **Sessions** ([`Session`]): one live connection each, from
//!    unauthenticated through authenticated to torn down.
//! 2. **Users** ([`User`]): authenticated identities that survive brief
//!    disconnects through the dangle window.
//! 3. **Registries** ([`SessionRegistry`], [`UserRegistry`]): the
//!    process-wide concurrent indexes.
//! 4. **External identity** ([`WebApi`], [`HttpApi`]): the
//!    `/me`, `/chart/{id}`, `/record/{id}` lookups.

mod api;
mod error;
mod registry;
mod session;
mod user;

pub use api::{HttpApi, WebApi};
pub use error::SessionError;
pub use registry::{SessionRegistry, UserRegistry};
pub use session::Session;
pub use user::User;
