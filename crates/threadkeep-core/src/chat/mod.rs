//! Threaded chat persistence.
//!
//! - `normalize`: raw or legacy records to typed `Chat`
//! - `record`: hash encoding and single-record access
//! - `index`: recency indexes (all chats, roots, children)
//! - `propagation`: single-hop parent updates
//! - `thread`: subtree walks, ancestors, trees, orphan policy
//! - `service`: the public operations

pub mod index;
pub mod keys;
pub mod normalize;
pub mod propagation;
pub mod record;
pub mod service;
pub mod thread;
