//! Page fault policy.
//!
//! The arch trap handler reads CR2 and the pushed error code and calls
//! [`handle`]. Faults on non-present pages at or above
//! [`DYNAMIC_BASE`](super::paging::DYNAMIC_BASE) are resolved by mapping a
//! fresh frame; everything else is fatal. The classification itself is a
//! pure function so the policy is testable off-target.

use bitflags::bitflags;

use super::paging::{DYNAMIC_BASE, PAGE_SIZE};

bitflags! {
    /// x86 page-fault error code bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCode: u32 {
        /// Set when the fault was a protection violation on a present page.
        const PRESENT = 1 << 0;
        /// Set for writes, clear for reads.
        const WRITE = 1 << 1;
        /// Set when the access came from user mode.
        const USER = 1 << 2;
        /// Reserved bit violation in a paging structure.
        const RESERVED = 1 << 3;
        /// Instruction fetch.
        const INSTRUCTION = 1 << 4;
    }
}

/// What to do about a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Map a fresh writable frame at the containing page.
    MapDynamic { page_base: u32 },
    /// Unrecoverable; log and halt.
    Fatal,
}

/// Decide how to treat a fault. Lazily populating the dynamic region only
/// applies to non-present faults; a protection violation up there is as
/// fatal as anywhere else.
pub fn classify(fault_addr: u32, code: FaultCode) -> FaultAction {
    if !code.contains(FaultCode::PRESENT) && fault_addr >= DYNAMIC_BASE {
        FaultAction::MapDynamic {
            page_base: fault_addr & !(PAGE_SIZE - 1),
        }
    } else {
        FaultAction::Fatal
    }
}

/// Resolve a page fault or halt. Bare-metal only: the resolution path
/// allocates a frame and edits the live page tables.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn handle(fault_addr: u32, code: FaultCode) {
    match classify(fault_addr, code) {
        FaultAction::MapDynamic { page_base } => {
            let Some(frame) = super::frame::alloc_page() else {
                // Out of physical memory inside the fault path; nothing to
                // unwind to.
                log::error!(
                    "page fault at {:#010x}: physical memory exhausted",
                    fault_addr
                );
                crate::arch::halt();
            };
            super::paging::map_page(
                page_base,
                frame,
                super::paging::PageFlags::PRESENT | super::paging::PageFlags::WRITABLE,
            );
        }
        FaultAction::Fatal => {
            log::error!(
                "unhandled page fault at {:#010x} (error code {:#x})",
                fault_addr,
                code.bits()
            );
            crate::arch::halt();
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn dynamic_region_read_fault_maps() {
        // scenario: first touch of 0xC0001000
        let action = classify(0xc000_1000, FaultCode::empty());
        assert_eq!(
            action,
            FaultAction::MapDynamic {
                page_base: 0xc000_1000
            }
        );
    }

    #[test]
    fn dynamic_region_fault_rounds_to_page() {
        let action = classify(0xc000_1a2b, FaultCode::WRITE);
        assert_eq!(
            action,
            FaultAction::MapDynamic {
                page_base: 0xc000_1000
            }
        );
    }

    #[test]
    fn fault_below_dynamic_base_is_fatal() {
        assert_eq!(classify(0xbfff_f000, FaultCode::empty()), FaultAction::Fatal);
        assert_eq!(classify(0x0000_0000, FaultCode::WRITE), FaultAction::Fatal);
    }

    #[test]
    fn protection_violation_is_fatal_everywhere() {
        assert_eq!(
            classify(0xc000_1000, FaultCode::PRESENT | FaultCode::WRITE),
            FaultAction::Fatal
        );
    }

    #[test]
    fn boundary_address_is_dynamic() {
        assert!(matches!(
            classify(DYNAMIC_BASE, FaultCode::empty()),
            FaultAction::MapDynamic { .. }
        ));
    }
}
