//! Pipelined write commands.

/// A single write queued in a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: String, value: String },
    HSet { key: String, field: String, value: String },
    Del { key: String },
    HDel { key: String, field: String },
}

/// An ordered list of writes sent to the store in one round trip via
/// [`KeyValueStore::apply`](crate::KeyValueStore::apply).
///
/// Commands are applied in insertion order. Whether a failing batch leaves
/// earlier commands applied is backend-specific; callers must treat a failed
/// batch as "partially written" and never build on top of it.
///
/// # Examples
///
/// ```
/// use fetchtrack_store::Batch;
///
/// let mut batch = Batch::new();
/// batch.hset("dm:A", "0123", "/srv/share/alpha").hset("pc:A", "0123", "<html></html>");
/// assert_eq!(batch.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<Command>,
}
impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { commands: Vec::with_capacity(capacity) }
    }

    pub fn hset(&mut self, key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.commands.push(Command::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }
}
impl IntoIterator for Batch {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;
    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}
impl Extend<Command> for Batch {
    fn extend<T: IntoIterator<Item = Command>>(&mut self, iter: T) {
        self.commands.extend(iter);
    }
}
