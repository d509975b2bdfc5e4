//! Global tuning constants for the buffer engine

pub mod buffer {
    /// Maximum number of bytes stored in a single rope chunk.
    pub const MAX_CHUNK_BYTES: usize = 4096;
}

pub mod interp {
    /// Maximum number of codepoints covered by a single decoding chunk.
    pub const MAX_CODEPOINTS_PER_CHUNK: usize = 1000;

    /// Codepoint produced whenever decoding fails.
    pub const REPLACEMENT_CODEPOINT: u32 = 0xFFFD;

    /// Number of codepoint boundaries recorded after the erased range of a
    /// modification, used to re-synchronize decoding with the old chunk
    /// structure. Must exceed the longest codepoint of any registered
    /// encoding.
    pub const POST_ERASE_BOUNDARY_WINDOW: usize = 6;
}
