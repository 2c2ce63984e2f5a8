//! Write batches
//!
//! A `WriteBatch` collects puts and deletes that the engine logs as one WAL
//! entry and applies to the memtable under one lock.

use crate::wal::Operation;

/// An ordered group of writes applied atomically
///
/// Later operations on the same key override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<Operation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    /// Queue a put
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(Operation::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue a delete
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(Operation::Delete { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued operations in insertion order
    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// The single WAL operation this batch is logged as
    pub(crate) fn into_operation(self) -> Operation {
        Operation::Batch { ops: self.ops }
    }
}

impl<K, V> FromIterator<(K, V)> for WriteBatch
where
    K: Into<Vec<u8>>,
    V: Into<Vec<u8>>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut batch = WriteBatch::new();
        for (key, value) in iter {
            batch.put(key, value);
        }
        batch
    }
}
