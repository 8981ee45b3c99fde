//! Byte patterns stamped into pages so that the state of every byte is recognizable
//! when inspecting allocator memory in a debugger or a memory dump.
//!
//! The values are stable for the lifetime of the crate's major version.

/// Stamped into the payload of every block when its page is created, if debug mode is on.
pub const UNALLOCATED_PATTERN: u8 = 0xAA;

/// Stamped into the payload of a block when it is handed out, if debug mode is on.
pub const ALLOCATED_PATTERN: u8 = 0xBB;

/// Stamped into the payload of a block when it is released, if debug mode is on.
pub const FREED_PATTERN: u8 = 0xCC;

/// Fills the guard bytes on both sides of every payload. Always stamped, even when debug
/// mode is off, so that corruption checks stay meaningful if debug mode is enabled later.
pub const PAD_PATTERN: u8 = 0xDD;

/// Fills the alignment bytes before the first block and between consecutive blocks.
pub const ALIGN_PATTERN: u8 = 0xEE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_are_distinct() {
        let patterns = [
            UNALLOCATED_PATTERN,
            ALLOCATED_PATTERN,
            FREED_PATTERN,
            PAD_PATTERN,
            ALIGN_PATTERN,
        ];

        for (i, a) in patterns.iter().enumerate() {
            for b in patterns.iter().skip(i.wrapping_add(1)) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn patterns_are_not_header_flags() {
        // Header bytes only ever hold 0 (free) or 1 (in use).
        for pattern in [PAD_PATTERN, ALIGN_PATTERN] {
            assert!(pattern > 1);
        }
    }
}
