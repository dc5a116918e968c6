bitflags::bitflags! {
    /// Per-request allocation options.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct MemoryFlags: u32 {
        /// Map user-accessible, in the private (user) range.
        const USER = 1 << 0;

        /// Zero the returned memory. Done after the memory lock is released.
        const ZERO = 1 << 1;
    }
}
