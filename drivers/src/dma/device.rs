//! Per-card device state, the fixed device registry, and receive
//! dispatch.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::ffi::{c_int, c_void};
use core::sync::atomic::AtomicU32;

use axstream_abi::dma::{DestMask, FrameFlags};
use axstream_lib::kernel_services::driver_runtime::{
    self, irq_register_handler, register_idle_wakeup_callback,
};
use axstream_lib::{InitFlag, InterruptFrame, IrqMutex, StateFlag, klog_info, klog_trace};

use super::adapter::{self, HwAdapter};
use super::buffer::PoolKind;
use super::chardev::DmaSubscriber;
use super::config::DmaConfig;
use super::dest::DestTable;
use super::pool::BufferPool;
use super::stats::DmaStats;
use super::types::DmaError;
use crate::mmio::MmioRegion;

/// Size of the module-scoped device table.
pub const MAX_DEVICES: usize = 4;

/// Concurrent opens per device.
pub const MAX_SUBSCRIBERS: usize = 16;

/// Device lifecycle states.
pub const DEV_OFFLINE: u8 = 0;
pub const DEV_READY: u8 = 1;
pub const DEV_TEARDOWN: u8 = 2;

/// What card-specific bring-up hands the core: a mapped register window
/// and the interrupt line it wired up.
pub struct HwInfo {
    pub regs: MmioRegion,
    pub irq_line: u8,
}

pub struct DmaDevice {
    /// Registry slot, also the character-device minor.
    pub index: u32,
    pub config: DmaConfig,
    pub regs: MmioRegion,
    pub irq_line: u8,
    pub adapter: HwAdapter,
    pub tx_pool: BufferPool,
    pub rx_pool: BufferPool,
    pub dest_table: DestTable,
    /// Destinations this card accepts, reported by the adapter at init.
    pub dest_mask: DestMask,
    pub state: StateFlag,
    /// Debug verbosity, settable by ioctl.
    pub debug: AtomicU32,
    pub stats: IrqMutex<DmaStats>,
    /// Serializes multi-register command sequences (loopback, ack,
    /// register peek/poke).
    pub command_lock: IrqMutex<()>,
    pub(crate) subscribers: IrqMutex<[Option<Arc<DmaSubscriber>>; MAX_SUBSCRIBERS]>,
}

enum DispatchOutcome {
    Queued,
    Rearm,
    Drop,
}

impl DmaDevice {
    /// Route one receive completion per the dispatch rule: under the
    /// destination-table lock, an owned destination gets the buffer
    /// queued (Armed→Ready); an unowned one sends the buffer straight
    /// back to the hardware free list. A completion racing a subscriber's
    /// unclaim therefore re-arms instead of leaking.
    pub(crate) fn rx_dispatch(&self, index: u32, size: u32, flags: FrameFlags, dest: u8, error: u32) {
        let outcome = self.dest_table.with_owner(dest, |owner| match owner {
            None => DispatchOutcome::Rearm,
            Some(sub) => {
                if self
                    .rx_pool
                    .complete(index, size, flags, dest, error)
                    .is_err()
                {
                    return DispatchOutcome::Drop;
                }
                match sub.queue.push(index) {
                    Ok(()) => DispatchOutcome::Queued,
                    // Racing close: the queue is already cancelled.
                    Err(_) => DispatchOutcome::Rearm,
                }
            }
        });

        match outcome {
            DispatchOutcome::Queued => {
                let mut stats = self.stats.lock();
                stats.rx_frames += 1;
                stats.rx_bytes += size as u64;
                if error != 0 {
                    stats.rx_errors += 1;
                }
                drop(stats);
                klog_trace!(
                    "dma{}: rx buffer {} dest {} size {} err {:#x}",
                    self.index,
                    index,
                    dest,
                    size,
                    error
                );
            }
            DispatchOutcome::Rearm => {
                self.count_rx_rearm();
                let _ = self.adapter.return_rx_buffer(self, index);
            }
            DispatchOutcome::Drop => self.count_rx_drop(),
        }
    }

    pub(crate) fn count_rx_drop(&self) {
        self.stats.lock().rx_dropped += 1;
    }

    pub(crate) fn count_rx_rearm(&self) {
        self.stats.lock().rx_rearms += 1;
    }

    /// Total buffers on both free lists plus armed/ready/held; the
    /// conservation invariant says this always equals the pool sizes.
    pub fn free_counts(&self) -> (u32, u32) {
        (self.tx_pool.free_count(), self.rx_pool.free_count())
    }

    /// Diagnostic dump: configuration, pool occupancy, subscriber claims,
    /// adapter state.
    pub fn seq_show(&self, w: &mut dyn core::fmt::Write) -> core::fmt::Result {
        writeln!(
            w,
            "dma{}: gen {:?} state {} tx {}x{} rx {}x{}",
            self.index,
            self.adapter.generation(),
            self.state.get(),
            self.config.tx_count,
            self.config.buf_size,
            self.config.rx_count,
            self.config.buf_size
        )?;
        let tx = self.tx_pool.owner_counts();
        let rx = self.rx_pool.owner_counts();
        writeln!(w, "  tx pool: free {} armed {} ready {} held {}", tx[0], tx[1], tx[2], tx[3])?;
        writeln!(w, "  rx pool: free {} armed {} ready {} held {}", rx[0], rx[1], rx[2], rx[3])?;
        writeln!(w, "  dests claimed: {}", self.dest_table.claimed_count())?;
        {
            let subs = self.subscribers.lock();
            for sub in subs.iter().flatten() {
                writeln!(
                    w,
                    "  subscriber {}: queued {} claims {}",
                    sub.id,
                    sub.queue.ready_count(),
                    sub.claimed.lock().count()
                )?;
            }
        }
        writeln!(w, "  {}", *self.stats.lock())?;
        self.adapter.seq_show(self, w)
    }
}

// =============================================================================
// Device registry
// =============================================================================

static DEVICES: IrqMutex<[Option<Box<DmaDevice>>; MAX_DEVICES]> =
    IrqMutex::new([const { None }; MAX_DEVICES]);

static POLL_CB_REGISTERED: InitFlag = InitFlag::new();

/// Interrupt entry registered with the platform; `ctx` is the device.
pub extern "C" fn dma_irq_entry(_irq: u8, _frame: *mut InterruptFrame, ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    // SAFETY: ctx was produced from the registry's boxed device, which
    // stays allocated until shutdown disables the interrupt line.
    let dev = unsafe { &*(ctx as *const DmaDevice) };
    if dev.state.get() != DEV_READY {
        return;
    }
    let _ = dev.adapter.irq(dev);
}

/// Idle-loop poll callback servicing every `irq_dis` device.
fn dma_poll_idle_cb() -> c_int {
    let mut handled = 0usize;
    for slot in 0..MAX_DEVICES {
        if let Some(dev) = device_get(slot) {
            if dev.config.irq_dis && dev.state.get() == DEV_READY {
                handled += dev.adapter.poll(dev);
            }
        }
    }
    (handled > 0) as c_int
}

/// Bring up one card: probe the generation, build the pools, initialize
/// the adapter, wire the interrupt, and publish the device in its slot.
pub fn dma_device_register(slot: usize, hw: HwInfo, config: DmaConfig) -> Result<(), DmaError> {
    if slot >= MAX_DEVICES || !hw.regs.is_mapped() {
        return Err(DmaError::InvalidArgument);
    }
    config.validate()?;
    if DEVICES.lock()[slot].is_some() {
        return Err(DmaError::DestinationBusy);
    }

    let generation = adapter::probe(&hw.regs)?;
    let hw_adapter = HwAdapter::new(generation, &config)?;

    let tx_pool = match BufferPool::create(PoolKind::Tx, config.mode, 0, config.tx_count, config.buf_size) {
        Ok(pool) => pool,
        Err(err) => {
            hw_adapter.release_memory();
            return Err(err);
        }
    };
    let rx_pool = match BufferPool::create(
        PoolKind::Rx,
        config.mode,
        config.tx_count,
        config.rx_count,
        config.buf_size,
    ) {
        Ok(pool) => pool,
        Err(err) => {
            let mut tx_pool = tx_pool;
            tx_pool.release_memory();
            hw_adapter.release_memory();
            return Err(err);
        }
    };

    let mut dev = Box::new(DmaDevice {
        index: slot as u32,
        config,
        regs: hw.regs,
        irq_line: hw.irq_line,
        adapter: hw_adapter,
        tx_pool,
        rx_pool,
        dest_table: DestTable::new(),
        dest_mask: DestMask::empty(),
        state: StateFlag::new(DEV_OFFLINE),
        debug: AtomicU32::new(0),
        stats: IrqMutex::new(DmaStats::new()),
        command_lock: IrqMutex::new(()),
        subscribers: IrqMutex::new([const { None }; MAX_SUBSCRIBERS]),
    });

    let mask = match dev.adapter.init(&dev) {
        Ok(mask) => mask,
        Err(err) => {
            teardown_memory(&mut dev);
            return Err(err);
        }
    };
    dev.dest_mask = mask;

    if driver_runtime::is_driver_runtime_initialized() {
        if dev.config.irq_dis {
            if POLL_CB_REGISTERED.claim() {
                register_idle_wakeup_callback(Some(dma_poll_idle_cb));
            }
        } else {
            let ctx = &*dev as *const DmaDevice as *mut c_void;
            let rc = irq_register_handler(
                dev.irq_line,
                Some(dma_irq_entry),
                ctx,
                c"axstream".as_ptr(),
            );
            if rc != 0 {
                teardown_memory(&mut dev);
                return Err(DmaError::NotAvailable);
            }
            driver_runtime::irq_enable_line(dev.irq_line);
        }
    }

    dev.adapter.enable(&dev);
    dev.state.set(DEV_READY);

    klog_info!(
        "dma{}: online, gen {:?}, {} tx + {} rx buffers of {} bytes, {} destinations",
        slot,
        dev.adapter.generation(),
        dev.config.tx_count,
        dev.config.rx_count,
        dev.config.buf_size,
        dev.dest_mask.count()
    );

    let mut devices = DEVICES.lock();
    if devices[slot].is_some() {
        drop(devices);
        teardown_memory(&mut dev);
        return Err(DmaError::DestinationBusy);
    }
    devices[slot] = Some(dev);
    Ok(())
}

/// Look up a registered device.
///
/// The reference is valid until [`dma_device_shutdown`] runs for the
/// slot; the registry's boxed allocation is stable in between. Callers
/// must not cache it across teardown.
pub fn device_get(slot: usize) -> Option<&'static DmaDevice> {
    let devices = DEVICES.lock();
    let dev = devices.get(slot)?.as_ref()?;
    // SAFETY: the Box heap allocation is stable; moving the Box (a
    // pointer-sized value) does not move the pointee. Validity until
    // shutdown is the documented contract.
    Some(unsafe { &*(&**dev as *const DmaDevice) })
}

/// Tear down one card: force every subscriber closed, take the device
/// offline, reclaim all buffers, free the DMA memory, and empty the
/// registry slot. New opens fail "not available" as soon as the state
/// leaves `DEV_READY`.
pub fn dma_device_shutdown(slot: usize) -> Result<(), DmaError> {
    let dev = device_get(slot).ok_or(DmaError::NotAvailable)?;
    if !dev.state.transition(DEV_READY, DEV_TEARDOWN) {
        return Err(DmaError::NotAvailable);
    }

    super::chardev::close_all_subscribers(dev);

    if driver_runtime::is_driver_runtime_initialized() && !dev.config.irq_dis {
        driver_runtime::irq_disable_line(dev.irq_line);
    }
    dev.adapter.clear(dev);
    dev.tx_pool.force_all_free();
    dev.rx_pool.force_all_free();

    let boxed = DEVICES.lock()[slot].take();
    if let Some(mut boxed) = boxed {
        teardown_memory(&mut boxed);
    }
    klog_info!("dma{}: offline", slot);
    Ok(())
}

fn teardown_memory(dev: &mut DmaDevice) {
    dev.adapter.release_memory();
    dev.tx_pool.release_memory();
    dev.rx_pool.release_memory();
}
