//! Fixtures for the in-kernel test suites.
//!
//! Installs stub service tables through the same registration path the
//! platform uses at boot: a bump-arena DMA allocator with a synthetic
//! low bus-address space, a counting signal sink, no-op scheduler entry
//! points, and a synthetic monotonic clock. Register windows handed to
//! devices under test are plain arena memory, so register writes are
//! observable by reading them back.

use core::cell::UnsafeCell;
use core::ffi::{c_char, c_int, c_void};
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::Once;

use axstream_abi::addr::{PhysAddr, VirtAddr};
use axstream_lib::IrqMutex;
use axstream_lib::kernel_services::dma_memory::{
    DmaMapping, DmaMemoryServices, register_dma_memory_services,
};
use axstream_lib::kernel_services::driver_runtime::{
    DriverIrqHandler, DriverRuntimeServices, DriverTaskHandle, register_driver_runtime_services,
};
use axstream_lib::kernel_services::platform::{PlatformServices, register_platform_services};

use crate::mmio::MmioRegion;

// =============================================================================
// Arena
// =============================================================================

const ARENA_SIZE: usize = 4 * 1024 * 1024;
const ARENA_ALIGN: usize = 4096;

#[repr(C, align(4096))]
struct Arena(UnsafeCell<[u8; ARENA_SIZE]>);

// SAFETY: regions are handed out exactly once by the bump index; each
// owner has exclusive access to its slice.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; ARENA_SIZE]));
static ARENA_NEXT: AtomicUsize = AtomicUsize::new(0);

/// Synthetic bus-address base for arena allocations. Low enough that
/// every handle fits the Gen1 hardware's 32-bit ports.
pub const FIXTURE_BUS_BASE: u64 = 0x0010_0000;

fn arena_alloc(len: usize) -> DmaMapping {
    let len = len.div_ceil(ARENA_ALIGN) * ARENA_ALIGN;
    let offset = ARENA_NEXT.fetch_add(len, Ordering::AcqRel);
    if offset + len > ARENA_SIZE {
        return DmaMapping::INVALID;
    }
    DmaMapping {
        virt: VirtAddr::new(ARENA.0.get() as u64 + offset as u64),
        bus: PhysAddr(FIXTURE_BUS_BASE + offset as u64),
    }
}

/// Translate an arena bus address (as read back from a device register
/// or descriptor) to a CPU pointer. Tests playing the device side use
/// this to reach ring and buffer memory.
pub fn bus_to_ptr(bus: u64) -> *mut u8 {
    let bus = bus & !ACP_APERTURE_BIT;
    debug_assert!(bus >= FIXTURE_BUS_BASE && bus < FIXTURE_BUS_BASE + ARENA_SIZE as u64);
    (ARENA.0.get() as u64 + (bus - FIXTURE_BUS_BASE)) as *mut u8
}

/// An arena-backed fake register window of `len` bytes, zero-filled.
pub fn alloc_regs_window(len: usize) -> MmioRegion {
    let mapping = arena_alloc(len);
    MmioRegion::from_parts(mapping.virt, mapping.bus, len)
}

// =============================================================================
// DMA memory stubs
// =============================================================================

static MAPPING_VALID: AtomicBool = AtomicBool::new(true);
static SYNC_FOR_DEVICE: AtomicU32 = AtomicU32::new(0);
static SYNC_FOR_CPU: AtomicU32 = AtomicU32::new(0);

/// Bus-address bit the ACP rewrite sets, mimicking the coherent-port
/// aperture on SoC cards.
pub const ACP_APERTURE_BIT: u64 = 1 << 40;

fn fx_alloc_coherent(len: usize) -> DmaMapping {
    arena_alloc(len)
}

fn fx_free_coherent(_mapping: DmaMapping, _len: usize) {}

fn fx_alloc_streaming(len: usize) -> DmaMapping {
    arena_alloc(len)
}

fn fx_free_streaming(_mapping: DmaMapping, _len: usize) {}

fn fx_sync_for_device(_bus: PhysAddr, _len: usize) {
    SYNC_FOR_DEVICE.fetch_add(1, Ordering::Relaxed);
}

fn fx_sync_for_cpu(_bus: PhysAddr, _len: usize) {
    SYNC_FOR_CPU.fetch_add(1, Ordering::Relaxed);
}

fn fx_map_acp(bus: PhysAddr) -> PhysAddr {
    PhysAddr(bus.as_u64() | ACP_APERTURE_BIT)
}

fn fx_mapping_valid(_bus: PhysAddr, _len: usize) -> bool {
    MAPPING_VALID.load(Ordering::Relaxed)
}

static DMA_MEMORY_STUBS: DmaMemoryServices = DmaMemoryServices {
    alloc_coherent: fx_alloc_coherent,
    free_coherent: fx_free_coherent,
    alloc_streaming: fx_alloc_streaming,
    free_streaming: fx_free_streaming,
    sync_for_device: fx_sync_for_device,
    sync_for_cpu: fx_sync_for_cpu,
    map_acp: fx_map_acp,
    mapping_valid: fx_mapping_valid,
};

/// Make every `mapping_valid` check pass or fail; exercises the
/// `to_hw`-failure path.
pub fn set_mapping_valid(valid: bool) {
    MAPPING_VALID.store(valid, Ordering::Relaxed);
}

pub fn sync_for_device_count() -> u32 {
    SYNC_FOR_DEVICE.load(Ordering::Relaxed)
}

pub fn sync_for_cpu_count() -> u32 {
    SYNC_FOR_CPU.load(Ordering::Relaxed)
}

// =============================================================================
// Driver-runtime stubs
// =============================================================================

const SIGNAL_SLOTS: usize = 8;

static SIGNAL_COUNTS: IrqMutex<[(u32, u32); SIGNAL_SLOTS]> =
    IrqMutex::new([(0, 0); SIGNAL_SLOTS]);
static TEST_PGID: AtomicU32 = AtomicU32::new(100);
static IRQ_CONTEXT: AtomicPtr<c_void> = AtomicPtr::new(core::ptr::null_mut());
static IRQ_LINE: AtomicU32 = AtomicU32::new(u32::MAX);
static IDLE_CALLBACK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

fn fx_scheduler_is_enabled() -> c_int {
    0
}

fn fx_current_task() -> DriverTaskHandle {
    // No scheduler in the test harness: blocking waits degrade to an
    // immediate return, which the suites rely on.
    core::ptr::null_mut()
}

fn fx_current_task_id() -> u32 {
    1
}

fn fx_current_task_pgid() -> u32 {
    TEST_PGID.load(Ordering::Relaxed)
}

fn fx_block_current_task() {}

fn fx_unblock_task(_task: DriverTaskHandle) -> c_int {
    0
}

fn fx_register_idle_wakeup_callback(callback: Option<fn() -> c_int>) {
    let raw = callback.map_or(core::ptr::null_mut(), |f| f as *mut ());
    IDLE_CALLBACK.store(raw, Ordering::Release);
}

fn fx_signal_process_group(pgid: u32, _signum: u8) -> bool {
    let mut counts = SIGNAL_COUNTS.lock();
    for slot in counts.iter_mut() {
        if slot.0 == pgid {
            slot.1 += 1;
            return true;
        }
        if slot.0 == 0 {
            *slot = (pgid, 1);
            return true;
        }
    }
    false
}

fn fx_irq_register_handler(
    irq_line: u8,
    _handler: Option<DriverIrqHandler>,
    context: *mut c_void,
    _name: *const c_char,
) -> i32 {
    IRQ_LINE.store(irq_line as u32, Ordering::Relaxed);
    IRQ_CONTEXT.store(context, Ordering::Release);
    0
}

fn fx_irq_enable_line(_irq_line: u8) {}

fn fx_irq_disable_line(_irq_line: u8) {}

static RUNTIME_STUBS: DriverRuntimeServices = DriverRuntimeServices {
    scheduler_is_enabled: fx_scheduler_is_enabled,
    current_task: fx_current_task,
    current_task_id: fx_current_task_id,
    current_task_pgid: fx_current_task_pgid,
    block_current_task: fx_block_current_task,
    unblock_task: fx_unblock_task,
    register_idle_wakeup_callback: fx_register_idle_wakeup_callback,
    signal_process_group: fx_signal_process_group,
    irq_register_handler: fx_irq_register_handler,
    irq_enable_line: fx_irq_enable_line,
    irq_disable_line: fx_irq_disable_line,
};

/// Signals delivered to `pgid` through the stub sink.
pub fn signals_sent(pgid: u32) -> u32 {
    let counts = SIGNAL_COUNTS.lock();
    counts
        .iter()
        .find(|slot| slot.0 == pgid)
        .map_or(0, |slot| slot.1)
}

pub fn reset_signals() {
    let mut counts = SIGNAL_COUNTS.lock();
    *counts = [(0, 0); SIGNAL_SLOTS];
}

/// The process group id the stub runtime reports for the current task.
pub fn test_pgid() -> u32 {
    TEST_PGID.load(Ordering::Relaxed)
}

/// The interrupt line the driver registered, or `None`.
pub fn registered_irq_line() -> Option<u8> {
    let line = IRQ_LINE.load(Ordering::Relaxed);
    if line == u32::MAX { None } else { Some(line as u8) }
}

// =============================================================================
// Platform stubs
// =============================================================================

static CLOCK_NS: AtomicU64 = AtomicU64::new(0);

fn fx_clock_monotonic_ns() -> u64 {
    // Advance one millisecond per query so timeout loops terminate.
    CLOCK_NS.fetch_add(1_000_000, Ordering::Relaxed) + 1_000_000
}

fn fx_console_putc(_c: u8) {}

static PLATFORM_STUBS: PlatformServices = PlatformServices {
    clock_monotonic_ns: fx_clock_monotonic_ns,
    console_putc: fx_console_putc,
};

// =============================================================================
// Device fixtures
// =============================================================================

/// Register window length handed to devices under test; covers both
/// generations' register maps.
pub const REGS_WINDOW_LEN: usize = 0x100;

/// A fake Gen2 register window: the version byte reads back as 2, the
/// rest starts zeroed (so `DEST_CAP` reports the full mask).
pub fn gen2_window() -> MmioRegion {
    let regs = alloc_regs_window(REGS_WINDOW_LEN);
    regs.write_u32(crate::dma::adapter::REG_VERSION, 0x0200_0000);
    regs
}

/// A fake Gen1 register window: version byte zero; the scratch-probe
/// write reads back trivially from plain memory.
pub fn gen1_window() -> MmioRegion {
    alloc_regs_window(REGS_WINDOW_LEN)
}

/// Tear down whatever occupies `slot` and register a fresh device there.
pub fn fresh_device(
    slot: usize,
    regs: MmioRegion,
    config: crate::dma::config::DmaConfig,
) -> Result<&'static crate::dma::device::DmaDevice, crate::dma::types::DmaError> {
    install();
    let _ = crate::dma::device::dma_device_shutdown(slot);
    crate::dma::device::dma_device_register(
        slot,
        crate::dma::device::HwInfo { regs, irq_line: 9 },
        config,
    )?;
    crate::dma::device::device_get(slot).ok_or(crate::dma::types::DmaError::NotAvailable)
}

// =============================================================================
// Installation
// =============================================================================

static INSTALL: Once<()> = Once::new();

/// Install every stub service table exactly once. Suites call this in
/// their setup; the real platform never registers in the test build, so
/// first-wins registration always succeeds.
pub fn install() {
    INSTALL.call_once(|| {
        register_dma_memory_services(&DMA_MEMORY_STUBS);
        register_driver_runtime_services(&RUNTIME_STUBS);
        register_platform_services(&PLATFORM_STUBS);
    });
}
