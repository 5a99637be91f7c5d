//! Request handlers for the event stream.

mod publish;
mod stream;

pub use publish::*;
pub use stream::*;
