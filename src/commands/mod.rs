//! Command implementations.

mod common;
mod derive;
mod stamp;

pub use common::{
    WorkingDirGuard,
    parse_version,
};
pub use derive::{
    DeriveArgs,
    derive,
};
pub use stamp::{
    StampArgs,
    stamp,
};
