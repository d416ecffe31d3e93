//! Data model for a dev-phone session.
//!
//! # Core Concepts
//!
//! - [`Session`]: one run of the orchestrator, identified by a generated
//!   `dev-phone-<suffix>` name that tags every remote resource it creates.
//! - [`ManagedResource`]: a remote resource owned by a session. There is no
//!   local record of what was created; resources are rediscovered by listing
//!   a kind and matching labels with a [`LabelFilter`].
//! - [`PhoneNumberBinding`]: the webhook configuration this session placed on
//!   a phone number, together with whatever was configured before.
//! - [`SessionToken`]: a signed client token carrying three grants.
//! - [`PluginSettings`]: read model served to the local UI.

mod binding;
mod resource;
mod session;
mod settings;
mod token;

pub use binding::*;
pub use resource::*;
pub use session::*;
pub use settings::*;
pub use token::*;
