//! Fault information reported by the CPU.

bitflags::bitflags! {
    /// Page fault error code pushed by the CPU.
    ///
    /// The bits follow the x86_64 encoding, so the code can be taken straight
    /// from an interrupt frame.
    pub struct PFErrorCode: u64 {
        /// The fault was caused by a page-level protection violation. When
        /// clear, the fault was caused by a non-present page.
        const PRESENT = 1 << 0;
        /// The access causing the fault was a write.
        const WRITE_ACCESS = 1 << 1;
        /// The access causing the fault originated in user mode.
        const USER = 1 << 2;
    }
}
