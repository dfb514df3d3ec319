#[macro_use]
extern crate serde;

#[macro_use]
extern crate log;

mod config;
mod counter;
mod error;
mod field;
mod net;
mod persist;
mod shamir;
mod util;
mod voter;

pub use config::*;
pub use counter::*;
pub use error::*;
pub use field::*;
pub use net::*;
pub use persist::*;
pub use shamir::*;
pub use voter::*;

pub(crate) use util::*;

#[cfg(test)]
mod tests;
