//! Session core: identifiers, record types, codec, transport boundary and
//! the [`Manager`] that ties them to a storage backend.

pub mod codec;
pub mod error;
pub mod id;
pub mod manager;
pub mod state;
pub mod transport;
pub mod value;

pub use codec::SessionMap;
pub use error::{Result, SessionError};
pub use id::{generate_session_id, redact, validate_session_id};
pub use manager::{Manager, ManagerConfig};
pub use state::SessionValues;
pub use transport::{RequestContext, SameSite, SessionCookie, Transport};
pub use value::{SessionKey, SessionValue};
