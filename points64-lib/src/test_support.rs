use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    base_address::BASE_SIGNATURE,
    memory_accessors::{MemoryAccessor, MemoryError},
};

/// In-process stand-in for a foreign process's memory. Clones share the
/// same backing buffer, so tests can poke values behind the accessor the
/// code under test owns.
#[derive(Clone)]
pub(crate) struct FakeMemory(Arc<Inner>);

struct Inner {
    memory: Mutex<Vec<u8>>,
    alive: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FakeMemory {
    pub fn new(size: usize) -> Self {
        Self(Arc::new(Inner {
            memory: Mutex::new(vec![0; size]),
            alive: AtomicBool::new(true),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }))
    }

    pub fn poke(&self, addr: usize, bytes: &[u8]) {
        self.0.memory.lock().unwrap()[addr..addr + bytes.len()].copy_from_slice(bytes);
    }

    pub fn peek(&self, addr: usize, len: usize) -> Vec<u8> {
        self.0.memory.lock().unwrap()[addr..addr + len].to_vec()
    }

    pub fn put_signature(&self, addr: usize) {
        self.poke(addr, &BASE_SIGNATURE[0].to_le_bytes());
        self.poke(addr + 4, &BASE_SIGNATURE[1].to_le_bytes());
    }

    pub fn kill(&self) {
        self.0.alive.store(false, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.0.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.0.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl MemoryAccessor for FakeMemory {
    fn read(&self, addr: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        if self.0.fail_reads.load(Ordering::SeqCst) {
            return Err(MemoryError::Os("injected read failure".to_owned()));
        }
        let memory = self.0.memory.lock().unwrap();
        let end = addr.checked_add(buffer.len()).filter(|&end| end <= memory.len());
        let Some(end) = end else {
            return Err(MemoryError::AccessDenied);
        };
        buffer.copy_from_slice(&memory[addr..end]);
        Ok(())
    }

    fn write(&self, addr: usize, buffer: &[u8]) -> Result<(), MemoryError> {
        if self.0.fail_writes.load(Ordering::SeqCst) {
            return Err(MemoryError::Os("injected write failure".to_owned()));
        }
        let mut memory = self.0.memory.lock().unwrap();
        let end = addr.checked_add(buffer.len()).filter(|&end| end <= memory.len());
        let Some(end) = end else {
            return Err(MemoryError::AccessDenied);
        };
        memory[addr..end].copy_from_slice(buffer);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.0.alive.load(Ordering::SeqCst)
    }
}

static UNIQUE: AtomicUsize = AtomicUsize::new(0);

fn unique_temp_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "points64-{prefix}-{}-{}",
        std::process::id(),
        UNIQUE.fetch_add(1, Ordering::SeqCst)
    ))
}

pub(crate) fn temp_file_path(prefix: &str) -> PathBuf {
    unique_temp_path(prefix)
}

pub(crate) fn temp_patch_root() -> PathBuf {
    let root = unique_temp_path("patches");
    std::fs::create_dir_all(&root).unwrap();
    root
}
