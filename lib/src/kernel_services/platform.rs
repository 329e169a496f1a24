crate::define_service! {
    platform => PlatformServices {
        clock_monotonic_ns() -> u64;
        console_putc(c: u8);
    }
}
