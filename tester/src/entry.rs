use std::fmt;

/// A client command, as submitted to and committed by the peers.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Entry {
    #[prost(string, tag = "100")]
    pub value: String,
}

impl Entry {
    pub fn new(value: impl Into<String>) -> Entry {
        Entry {
            value: value.into(),
        }
    }
}

impl From<&str> for Entry {
    fn from(value: &str) -> Entry {
        Entry::new(value)
    }
}

impl From<String> for Entry {
    fn from(value: String) -> Entry {
        Entry { value }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}
