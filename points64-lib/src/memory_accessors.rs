#[cfg(windows)]
mod external_process;

use thiserror::Error;

#[cfg(windows)]
pub use external_process::{find_process_id, ExternalProcess};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("insufficient permission to access emulator memory. Try running as administrator")]
    AccessDenied,
    #[error(
        "emulator memory is not set to 16MB. \
         Change the memory size to 16MB and restart the emulator"
    )]
    UnsupportedMemorySize,
    #[error("{0}")]
    Os(String),
}

/// Raw byte access to a foreign process's address space.
///
/// Callers must not issue calls against the same process handle from two
/// code paths without serialization; the OS-level calls are not guaranteed
/// reentrant-safe across threads.
pub trait MemoryAccessor: Send {
    fn read(&self, addr: usize, buffer: &mut [u8]) -> Result<(), MemoryError>;
    fn write(&self, addr: usize, buffer: &[u8]) -> Result<(), MemoryError>;
    fn is_alive(&self) -> bool;

    fn read_u8(&self, addr: usize) -> Result<u8, MemoryError> {
        let mut buffer = [0; 1];
        self.read(addr, &mut buffer)?;
        Ok(buffer[0])
    }

    fn write_u8(&self, addr: usize, value: u8) -> Result<(), MemoryError> {
        self.write(addr, &[value])
    }

    fn read_u32(&self, addr: usize) -> Result<u32, MemoryError> {
        let mut buffer = [0; 4];
        self.read(addr, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    fn write_u32(&self, addr: usize, value: u32) -> Result<(), MemoryError> {
        self.write(addr, &value.to_le_bytes())
    }
}
