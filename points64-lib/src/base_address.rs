use thiserror::Error;
use tracing::debug;

use crate::memory_accessors::MemoryAccessor;

/// Two consecutive words of the loaded ROM's boot code, little-endian as the
/// emulator keeps them in host memory.
pub const BASE_SIGNATURE: [u32; 2] = [0x3c1a8032, 0x275a7650];

const SCAN_END: usize = 0xffff_ffff;
const SCAN_STEP: usize = 0x1000;

#[derive(Debug, Error)]
#[error("could not find the emulator base address. Make sure a ROM is loaded and running")]
pub struct BaseAddressNotFound;

/// Scans the process's address space for the ROM signature and returns the
/// address of the emulated RAM origin.
///
/// The scan covers the whole 32-bit range in RAM-page steps and keeps the
/// last matching location. Unreadable pages are skipped, not fatal; only a
/// full scan without any match fails.
pub fn find_base_address(
    accessor: &dyn MemoryAccessor,
) -> Result<usize, BaseAddressNotFound> {
    let mut candidate = None;
    for addr in (0..=SCAN_END).step_by(SCAN_STEP) {
        let Ok(first) = accessor.read_u32(addr) else {
            continue;
        };
        if first != BASE_SIGNATURE[0] {
            continue;
        }
        let Ok(second) = accessor.read_u32(addr + 4) else {
            continue;
        };
        if second != BASE_SIGNATURE[1] {
            continue;
        }
        debug!("signature match at {addr:#x}");
        candidate = Some(addr);
    }
    candidate.ok_or(BaseAddressNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMemory;

    #[test]
    fn finds_signature_pair() {
        let fake = FakeMemory::new(0x4000);
        fake.put_signature(0x1000);
        assert_eq!(find_base_address(&fake).unwrap(), 0x1000);
    }

    #[test]
    fn last_match_wins() {
        let fake = FakeMemory::new(0x4000);
        fake.put_signature(0x1000);
        fake.put_signature(0x3000);
        assert_eq!(find_base_address(&fake).unwrap(), 0x3000);
    }

    #[test]
    fn first_word_alone_is_not_a_match() {
        let fake = FakeMemory::new(0x4000);
        fake.poke(0x1000, &BASE_SIGNATURE[0].to_le_bytes());
        assert!(find_base_address(&fake).is_err());
    }

    #[test]
    fn exhausted_scan_fails() {
        let fake = FakeMemory::new(0x4000);
        assert!(find_base_address(&fake).is_err());
    }
}
