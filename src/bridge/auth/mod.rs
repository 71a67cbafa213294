//! SSH authentication strategies.
//!
//! The bridge authenticates with a password (the host's stored secret).
//! Strategies implement [`AuthStrategy`] so the factory does not depend on a
//! particular method.

mod password;
mod traits;

pub use password::PasswordAuth;
pub use traits::AuthStrategy;
