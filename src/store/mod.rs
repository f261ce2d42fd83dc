//! Durable tier: the redb store, its row format, and the worker that bounds
//! how long the cache waits on it.

mod codec;
mod durable;
mod worker;

pub use codec::{decode_vector, encode_vector, RowHeader};
pub use durable::{DurableStats, DurableStore};
pub use worker::{Pending, PersistentTier};
