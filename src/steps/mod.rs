//! Script steps, one module per keyword.

mod advance;
mod expect;
mod poll;
mod result;
mod rows;
mod send_command;

pub use advance::Advance;
pub use expect::Expect;
pub use poll::Poll;
pub use result::ExpectResult;
pub use rows::TableRows;
pub use send_command::SendCommand;
