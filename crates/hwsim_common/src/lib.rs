//! Shared foundational types for the hwsim workspace.
//!
//! Provides interned identifiers used as signal keys by the runtime and
//! content fingerprints used to compare elaborated component trees, along with
//! the femtosecond time units shared by the runtime and the settings loader.

#![warn(missing_docs)]

pub mod hash;
pub mod ident;
pub mod units;

pub use hash::{ContentHash, ContentHasher};
pub use ident::{Ident, Interner};
pub use units::{FS_PER_MS, FS_PER_NS, FS_PER_PS, FS_PER_S, FS_PER_US};
