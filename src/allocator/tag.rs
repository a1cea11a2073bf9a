/// Size in bytes of one boundary tag
pub const TAG_SIZE: u64 = 4;

/// Largest payload a tag can describe (30 bits)
pub const MAX_BLOCK_SIZE: u32 = (1 << 30) - 1;

const SIZE_MASK: u32 = MAX_BLOCK_SIZE;

/// Boundary tag stored before and after every block payload.
///
/// Encoded as one little-endian `u32`: payload size in the low 30 bits and
/// the allocation flag in the high 2 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub size: u32,
    pub allocated: bool,
}

impl Tag {
    pub fn free(size: u32) -> Self {
        Self {
            size,
            allocated: false,
        }
    }

    pub fn used(size: u32) -> Self {
        Self {
            size,
            allocated: true,
        }
    }

    pub fn encode(&self) -> [u8; TAG_SIZE as usize] {
        let flag = u32::from(self.allocated) << 30;
        ((self.size & SIZE_MASK) | flag).to_le_bytes()
    }

    pub fn decode(raw: [u8; TAG_SIZE as usize]) -> Self {
        let word = u32::from_le_bytes(raw);
        Self {
            size: word & SIZE_MASK,
            allocated: (word >> 30) != 0,
        }
    }
}
