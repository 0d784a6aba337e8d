//! Outbound messaging channels.
//!
//! Channels receive the runtime's replies and hand them to whatever
//! transport they wrap. The [`ChannelManager`] routes a reply back to the
//! channel its conversation came from, or broadcasts to all of them.
//!
//! # Main types
//!
//! - [`Channel`]: Trait implemented by every outbound transport.
//! - [`ChannelManager`]: Routes messages to registered channels.
//! - [`ConsoleChannel`]: Writes replies to stdout or any writer.

/// Core channel trait.
pub mod channel;
/// Console channel implementation.
pub mod console;
/// Channel manager for multi-channel routing.
pub mod manager;

pub use channel::Channel;
pub use console::ConsoleChannel;
pub use manager::ChannelManager;
