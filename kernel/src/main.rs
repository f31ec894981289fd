//! OnyxOS kernel binary: Multiboot entry and boot sequence.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use core::panic::PanicInfo;

    use onyx_kernel::arch::x86::boot::{BootInfo, BOOT_MAGIC};
    use onyx_kernel::{arch, fs, log_service, println, sched, services};

    #[panic_handler]
    fn panic(info: &PanicInfo<'_>) -> ! {
        println!("[KERNEL PANIC] {}", info);
        arch::halt();
    }

    /// Reached from the Multiboot entry stub with the loader's magic in
    /// the first argument and the info block pointer in the second.
    #[no_mangle]
    pub extern "C" fn kernel_entry(magic: u32, info_addr: u32) -> ! {
        arch::x86::init();
        log_service::init(log::LevelFilter::Info);

        println!("OnyxOS v{}", env!("CARGO_PKG_VERSION"));

        if magic != BOOT_MAGIC {
            panic!("bad loader magic {:#010x} (expected {:#010x})", magic, BOOT_MAGIC);
        }
        // SAFETY: the loader's info block is live and untouched this
        // early in boot.
        let info = unsafe { BootInfo::from_addr(info_addr) };
        if !info.has_memory_map() {
            panic!("loader provided no memory map");
        }
        let total = info.available_bytes();
        log::info!("boot: {} MiB available RAM", total / (1024 * 1024));

        // SAFETY: single-threaded boot, loader-reported memory size,
        // linker-provided image bounds.
        unsafe {
            onyx_kernel::mm::init(total);
        }

        sched::init();
        if let Err(err) = fs::init_root_ramdisk() {
            panic!("root filesystem: {}", err);
        }

        sched::spawn("shell", services::shell::shell_task, 32 * 1024);

        arch::enable_interrupts();
        log::info!("boot: entering idle loop");
        loop {
            sched::maybe_resched();
            arch::idle_wait();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
