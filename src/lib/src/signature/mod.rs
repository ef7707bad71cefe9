mod hash;
mod keys;
mod validator;

pub use hash::*;
pub use keys::*;
pub use validator::{verify, verify_prehashed};
