//! Per-process file descriptor table.
//!
//! Open files belong to the filesystem layer; the table only holds shared
//! handles to them. A forked child gets a copy of the table that shares
//! every handle with the parent.

use crate::{ExecError, ExecResult};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

/// Descriptor number
pub type Fd = usize;

/// An open file, as far as the execution core is concerned
pub trait OpenFile: Send + Sync + fmt::Debug {
    /// Path the file was opened with
    fn path(&self) -> &str;
}

/// Open file handles indexed by descriptor number
#[derive(Debug, Clone)]
pub struct FileDescriptorTable {
    slots: Vec<Option<Arc<dyn OpenFile>>>,
    limit: usize,
}

impl FileDescriptorTable {
    /// Default per-process descriptor limit
    pub const DEFAULT_LIMIT: usize = 256;

    /// Empty table
    pub fn new() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }

    /// Empty table holding at most `limit` descriptors
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            limit,
        }
    }

    /// Install `file` at the lowest free descriptor
    pub fn insert(&mut self, file: Arc<dyn OpenFile>) -> ExecResult<Fd> {
        if let Some(fd) = self.slots.iter().position(Option::is_none) {
            self.slots[fd] = Some(file);
            return Ok(fd);
        }
        if self.slots.len() >= self.limit {
            return Err(ExecError::OutOfResources);
        }
        self.slots.push(Some(file));
        Ok(self.slots.len() - 1)
    }

    /// Install `file` at `fd`, returning whatever was open there
    pub fn insert_at(&mut self, fd: Fd, file: Arc<dyn OpenFile>) -> ExecResult<Option<Arc<dyn OpenFile>>> {
        if fd >= self.limit {
            return Err(ExecError::InvalidArgument);
        }
        if fd >= self.slots.len() {
            self.slots.resize(fd + 1, None);
        }
        Ok(self.slots[fd].replace(file))
    }

    /// Handle open at `fd`
    pub fn get(&self, fd: Fd) -> Option<&Arc<dyn OpenFile>> {
        self.slots.get(fd).and_then(Option::as_ref)
    }

    /// Close `fd`, returning its handle
    pub fn close(&mut self, fd: Fd) -> ExecResult<Arc<dyn OpenFile>> {
        let file = self
            .slots
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(ExecError::InvalidArgument)?;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Ok(file)
    }

    /// Number of open descriptors
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Close everything
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl Default for FileDescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NamedFile;

    #[test]
    fn test_lowest_free_descriptor_is_reused() {
        let mut table = FileDescriptorTable::new();
        assert_eq!(table.insert(NamedFile::open("/dev/tty")), Ok(0));
        assert_eq!(table.insert(NamedFile::open("/etc/motd")), Ok(1));
        assert_eq!(table.insert(NamedFile::open("/tmp/log")), Ok(2));

        table.close(1).unwrap();
        assert_eq!(table.insert(NamedFile::open("/bin/sh")), Ok(1));
        assert_eq!(table.get(1).map(|f| f.path()), Some("/bin/sh"));
    }

    #[test]
    fn test_close_unknown_descriptor() {
        let mut table = FileDescriptorTable::new();
        assert_eq!(table.close(3).unwrap_err(), ExecError::InvalidArgument);
    }

    #[test]
    fn test_limit_is_enforced() {
        let mut table = FileDescriptorTable::with_limit(2);
        table.insert(NamedFile::open("a")).unwrap();
        table.insert(NamedFile::open("b")).unwrap();
        assert_eq!(table.insert(NamedFile::open("c")).unwrap_err(), ExecError::OutOfResources);
        assert_eq!(table.insert_at(5, NamedFile::open("d")).unwrap_err(), ExecError::InvalidArgument);
    }

    #[test]
    fn test_clone_shares_handles() {
        let mut table = FileDescriptorTable::new();
        let file = NamedFile::open("/dev/console");
        table.insert(file.clone()).unwrap();
        let copy = table.clone();
        assert_eq!(Arc::strong_count(&file), 3);
        assert_eq!(copy.get(0).map(|f| f.path()), Some("/dev/console"));
    }

    #[test]
    fn test_insert_at_replaces() {
        let mut table = FileDescriptorTable::new();
        table.insert(NamedFile::open("old")).unwrap();
        let previous = table.insert_at(0, NamedFile::open("new")).unwrap();
        assert_eq!(previous.as_ref().map(|f| f.path()), Some("old"));
        assert!(table.insert_at(4, NamedFile::open("far")).unwrap().is_none());
        assert_eq!(table.open_count(), 2);
    }
}
