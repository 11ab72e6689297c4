//! Miner identity trait and the hotkey identity used by the service binary.

use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Blanket-implemented for any type with Clone + Eq + Hash + Send + Sync + Debug + Display + Serialize + Deserialize.
pub trait MinerId:
    Clone + Eq + Hash + Send + Sync + Debug + Display + Serialize + for<'de> Deserialize<'de> + 'static
{
}

impl<T> MinerId for T where
    T: Clone
        + Eq
        + Hash
        + Send
        + Sync
        + Debug
        + Display
        + Serialize
        + for<'de> Deserialize<'de>
        + 'static
{
}

/// SS58 hotkey of a miner, kept opaque.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hotkey(String);

impl Hotkey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hotkey({})", self.0)
    }
}

impl Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Hotkey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for Hotkey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl FromStr for Hotkey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
