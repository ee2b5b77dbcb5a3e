mod base;
mod catalog;
mod connection;
mod schema;
mod tap;
mod target;
mod transformation;

pub use base::*;
pub use catalog::*;
pub use connection::*;
pub use schema::*;
pub use tap::*;
pub use target::*;
pub use transformation::*;
