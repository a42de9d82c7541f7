use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! numeric_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn from_raw(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }
    };
}

numeric_id!(NodeId, "node");
numeric_id!(FeedId, "feed");

/// Hands out distinct, strictly increasing identifiers of one kind.
///
/// Values are never reused for the lifetime of the generator. Each server
/// instance owns its generators, so tests never share a counter.
#[derive(Debug)]
pub struct IdGenerator<I> {
    next: AtomicU64,
    _kind: PhantomData<fn() -> I>,
}

impl<I: From<u64>> IdGenerator<I> {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
            _kind: PhantomData,
        }
    }

    pub fn next_id(&self) -> I {
        I::from(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl<I: From<u64>> Default for IdGenerator<I> {
    fn default() -> Self {
        Self::new()
    }
}
