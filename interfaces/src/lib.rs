pub mod defs;
pub mod fingerprint;

pub use defs::*;
pub use fingerprint::fingerprint;
