use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// One of the two storage generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    A,
    B,
}
impl Generation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    /// The generation that is not `self`.
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}
impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
impl FromStr for Generation {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            other => exn::bail!(ErrorKind::InvalidGeneration(other.to_string())),
        }
    }
}

const UNSET: u8 = 0;

/// In-process cache of the active generation pointer.
///
/// Owned by a [`Repository`](crate::Repository) (or shared between several
/// through an `Arc`); readers resolve keys through it without a store round
/// trip. Empty until the pointer has been read or written once.
#[derive(Debug, Default)]
pub struct ActiveGeneration(AtomicU8);
impl ActiveGeneration {
    pub fn new(generation: Option<Generation>) -> Self {
        let holder = Self::default();
        if let Some(generation) = generation {
            holder.set(generation);
        }
        holder
    }

    pub fn get(&self) -> Option<Generation> {
        match self.0.load(Ordering::Acquire) {
            1 => Some(Generation::A),
            2 => Some(Generation::B),
            _ => None,
        }
    }

    pub fn set(&self, generation: Generation) {
        let value = match generation {
            Generation::A => 1,
            Generation::B => 2,
        };
        self.0.store(value, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(UNSET, Ordering::Release);
    }
}
