//! Wire codec.
//!
//! Everything that knows the FUSE ABI byte layout lives below this
//! module: the structure definitions, the request parser and the reply
//! framer. The dispatcher consumes only the typed surface.

pub(crate) mod argument;
pub(crate) mod fuse_abi;
pub(crate) mod reply;
pub(crate) mod request;
