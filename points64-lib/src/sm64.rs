use std::{fmt, sync::Mutex};

use crate::{
    base_address::{find_base_address, BaseAddressNotFound},
    memory_accessors::{MemoryAccessor, MemoryError},
    patches::{swap_bytes, ByteOrder, REQUIREMENT_EXTENDED_RAM},
};

/// RAM offsets, relative to the discovered base address.
pub mod offsets {
    /// Incremented once per vertical interrupt.
    pub const GLOBAL_TIMER: usize = 0x32d5d4;
    /// Mario's current action id.
    pub const MARIO_ACTION: usize = 0x33b17c;
    /// File A flags in the in-memory save buffer.
    pub const FILE_A_FLAGS: usize = 0x207700;
    pub const FILE_A_FLAGS_LEN: usize = 0x70;

    // Cells owned by the injected command patch. The two sentinel cells gate
    // the patch's own bits validation; they must be written before a command
    // lands in the staging buffer.
    pub const MIN_BITS: usize = 0x36affc;
    pub const CHEER_BITS: usize = 0x36f000;
    pub const DEATH_TIMER: usize = 0x36f004;
    pub const INTRO_SKIP: usize = 0x36f008;
    pub const COMMAND_BUFFER: usize = 0x36f010;
    pub const COMMAND_BUFFER_LEN: usize = 512;

    // Network-compatibility block consumed by the Net64-style patches.
    pub const NET_CHARACTER: usize = 0xff5ff3;
    pub const NET_GAME_MODE: usize = 0xff5ff7;
    pub const NET_CONNECTION_FLAG: usize = 0xff5ff8;
    pub const NET_PLAYER_SLOTS: usize = 0xff7800;
    pub const NET_PLAYER_SLOT_LEN: usize = 0x100;
    pub const NET_PLAYER_SLOT_COUNT: usize = 24;
}

/// Action ids of the star-grab celebration animations.
pub const STAR_GRAB_ACTIONS: [u32; 4] = [0x00001302, 0x00001303, 0x00001307, 0x00001904];

const MIN_BITS_UNLOCK: u8 = 0x0a;
const CHEER_BITS_UNLOCK: u8 = 0xff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmulatorVariant {
    Version1_6,
    Version2_2Mm,
}

impl EmulatorVariant {
    /// RDRAM base addresses of the two supported emulator builds.
    const KNOWN_BASES: [(usize, EmulatorVariant); 2] = [
        (0x00dfdc00, EmulatorVariant::Version1_6),
        (0x10020000, EmulatorVariant::Version2_2Mm),
    ];

    pub fn from_base_address(base_address: usize) -> Self {
        Self::KNOWN_BASES
            .iter()
            .find(|(base, _)| *base == base_address)
            .map(|(_, variant)| *variant)
            .unwrap_or(if base_address >= 0x1000_0000 {
                Self::Version2_2Mm
            } else {
                Self::Version1_6
            })
    }

    /// Unknown requirement strings fail closed so that a mistyped
    /// metadata.json never patches an incompatible emulator.
    pub fn supports(self, requirement: &str) -> bool {
        match requirement {
            REQUIREMENT_EXTENDED_RAM => self == Self::Version2_2Mm,
            _ => false,
        }
    }
}

impl fmt::Display for EmulatorVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version1_6 => write!(f, "1.6"),
            Self::Version2_2Mm => write!(f, "2.2MM"),
        }
    }
}

/// The loaded game's RAM, addressed relative to the discovered base.
///
/// The single mutex serializes every foreign-process call issued through
/// this value; watchers, patch application and effect dispatch all share it.
pub struct Sm64 {
    accessor: Mutex<Box<dyn MemoryAccessor>>,
    base_address: usize,
}

impl Sm64 {
    /// Runs the signature scan and binds to the RAM it finds.
    pub fn attach(accessor: Box<dyn MemoryAccessor>) -> Result<Self, BaseAddressNotFound> {
        let base_address = find_base_address(accessor.as_ref())?;
        Ok(Self::new(accessor, base_address))
    }

    pub(crate) fn new(accessor: Box<dyn MemoryAccessor>, base_address: usize) -> Self {
        Self {
            accessor: Mutex::new(accessor),
            base_address,
        }
    }

    pub fn base_address(&self) -> usize {
        self.base_address
    }

    pub fn is_alive(&self) -> bool {
        self.accessor.lock().unwrap().is_alive()
    }

    pub fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        self.accessor
            .lock()
            .unwrap()
            .read(self.base_address + offset, buffer)
    }

    pub fn write(&self, offset: usize, buffer: &[u8]) -> Result<(), MemoryError> {
        self.accessor
            .lock()
            .unwrap()
            .write(self.base_address + offset, buffer)
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, MemoryError> {
        self.accessor
            .lock()
            .unwrap()
            .read_u32(self.base_address + offset)
    }

    pub fn write_u32(&self, offset: usize, value: u32) -> Result<(), MemoryError> {
        self.accessor
            .lock()
            .unwrap()
            .write_u32(self.base_address + offset, value)
    }

    pub fn write_u8(&self, offset: usize, value: u8) -> Result<(), MemoryError> {
        self.accessor
            .lock()
            .unwrap()
            .write_u8(self.base_address + offset, value)
    }

    // -------------------------------------------------------------------------

    pub fn global_timer(&self) -> Result<u32, MemoryError> {
        self.read_u32(offsets::GLOBAL_TIMER)
    }

    pub fn mario_action(&self) -> Result<u32, MemoryError> {
        self.read_u32(offsets::MARIO_ACTION)
    }

    pub fn file_a_flags(&self) -> Result<Vec<u8>, MemoryError> {
        let mut flags = vec![0; offsets::FILE_A_FLAGS_LEN];
        self.read(offsets::FILE_A_FLAGS, &mut flags)?;
        Ok(flags)
    }

    pub fn put_file_a_flags(&self, flags: &[u8]) -> Result<(), MemoryError> {
        self.write(offsets::FILE_A_FLAGS, flags)
    }

    pub fn set_character(&self, id: u8) -> Result<(), MemoryError> {
        self.write_u8(offsets::NET_CHARACTER, id)
    }

    pub fn clear_death_timer(&self) -> Result<(), MemoryError> {
        self.write_u32(offsets::DEATH_TIMER, 0)
    }

    pub fn set_intro_skip(&self) -> Result<(), MemoryError> {
        self.write_u8(offsets::INTRO_SKIP, 1)
    }

    /// Packs a command into the fixed-size staging buffer, corrects its byte
    /// order for the emulated word layout and unlocks the patch's validation
    /// cells so the command takes effect.
    pub fn write_command(&self, command: &str) -> Result<(), MemoryError> {
        let mut buffer = [0u8; offsets::COMMAND_BUFFER_LEN];
        let bytes = command.as_bytes();
        let len = bytes.len().min(offsets::COMMAND_BUFFER_LEN);
        buffer[..len].copy_from_slice(&bytes[..len]);
        swap_bytes(&mut buffer, ByteOrder::Word32);
        self.write_u8(offsets::MIN_BITS, MIN_BITS_UNLOCK)?;
        self.write_u8(offsets::CHEER_BITS, CHEER_BITS_UNLOCK)?;
        self.write(offsets::COMMAND_BUFFER, &buffer)
    }

    /// Resets the network-compatibility cells to the values a fresh
    /// networked session presents: known-good game mode and connection flag,
    /// and zeroed player save-slot blocks.
    pub fn reset_net_compat(&self) -> Result<(), MemoryError> {
        self.write_u8(offsets::NET_GAME_MODE, 0x01)?;
        self.write_u8(offsets::NET_CONNECTION_FLAG, 0x01)?;
        let empty_slot = [0u8; offsets::NET_PLAYER_SLOT_LEN];
        for slot in 0..offsets::NET_PLAYER_SLOT_COUNT {
            self.write(
                offsets::NET_PLAYER_SLOTS + slot * offsets::NET_PLAYER_SLOT_LEN,
                &empty_slot,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMemory;

    #[test]
    fn reads_and_writes_are_base_relative() {
        let fake = FakeMemory::new(0x10000);
        let sm64 = Sm64::new(Box::new(fake.clone()), 0x2000);
        sm64.write(0x10, &[1, 2, 3]).unwrap();
        assert_eq!(fake.peek(0x2010, 3), [1, 2, 3]);

        let mut buffer = [0u8; 3];
        sm64.read(0x10, &mut buffer).unwrap();
        assert_eq!(buffer, [1, 2, 3]);
    }

    #[test]
    fn variant_from_known_base_table() {
        assert_eq!(
            EmulatorVariant::from_base_address(0x00dfdc00),
            EmulatorVariant::Version1_6
        );
        assert_eq!(
            EmulatorVariant::from_base_address(0x10020000),
            EmulatorVariant::Version2_2Mm
        );
        // unknown bases fall back by range
        assert_eq!(
            EmulatorVariant::from_base_address(0x00e00000),
            EmulatorVariant::Version1_6
        );
        assert_eq!(
            EmulatorVariant::from_base_address(0x20000000),
            EmulatorVariant::Version2_2Mm
        );
    }

    #[test]
    fn extended_ram_requirement_needs_newer_variant() {
        assert!(EmulatorVariant::Version2_2Mm.supports(REQUIREMENT_EXTENDED_RAM));
        assert!(!EmulatorVariant::Version1_6.supports(REQUIREMENT_EXTENDED_RAM));
        assert!(!EmulatorVariant::Version2_2Mm.supports("no-such-requirement"));
    }

    #[test]
    fn net_compat_reset_zeroes_player_slots() {
        let fake = FakeMemory::new(0x1000000);
        fake.poke(offsets::NET_PLAYER_SLOTS + 0x42, &[0xff]);
        let sm64 = Sm64::new(Box::new(fake.clone()), 0);
        sm64.reset_net_compat().unwrap();
        assert_eq!(fake.peek(offsets::NET_GAME_MODE, 2), [0x01, 0x01]);
        let slots = fake.peek(
            offsets::NET_PLAYER_SLOTS,
            offsets::NET_PLAYER_SLOT_LEN * offsets::NET_PLAYER_SLOT_COUNT,
        );
        assert!(slots.iter().all(|&byte| byte == 0));
    }
}
