//! Identity-based call dispatch

mod call;
mod dispatcher;
mod transport;

pub use call::{Call, CallScope, Reply};
pub use dispatcher::{DispatchError, Dispatcher};
pub use transport::Transport;
