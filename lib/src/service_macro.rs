//! `define_service!` — declare a platform service table.
//!
//! Expands to a struct of function pointers, a set-once [`ServiceCell`]
//! holding the platform's registration, `register_*`/`is_*_initialized`
//! accessors, and a thin free-function wrapper per method. Methods tagged
//! `@no_wrapper` get no generated wrapper (write one by hand when the
//! signature needs massaging).
//!
//! [`ServiceCell`]: crate::ServiceCell

#[macro_export]
macro_rules! define_service {
    ($service:ident => $table:ident { $($body:tt)* }) => {
        $crate::__define_service_table! { $table; []; $($body)* }

        $crate::paste::paste! {
            #[doc(hidden)]
            pub static [<$service:upper _SERVICES_CELL>]: $crate::ServiceCell<$table> =
                $crate::ServiceCell::new();

            /// Install the platform's service table. The first installation
            /// wins; later calls return `false` and change nothing.
            pub fn [<register_ $service _services>](table: &'static $table) -> bool {
                [<$service:upper _SERVICES_CELL>].install(table)
            }

            /// Whether the platform has registered this service table.
            pub fn [<is_ $service _initialized>]() -> bool {
                [<$service:upper _SERVICES_CELL>].is_installed()
            }

            /// The registered service table.
            ///
            /// # Panics
            ///
            /// Panics before registration; guard early-boot paths with the
            /// matching `is_*_initialized()`.
            pub fn [<$service _services>]() -> &'static $table {
                match [<$service:upper _SERVICES_CELL>].get() {
                    Some(table) => table,
                    None => panic!(concat!(
                        stringify!($service),
                        " services not registered"
                    )),
                }
            }
        }

        $crate::__define_service_wrappers! { $service; $($body)* }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __define_service_table {
    ($table:ident; [$($acc:tt)*];) => {
        /// Table of platform-provided service entry points.
        pub struct $table {
            $($acc)*
        }
    };
    ($table:ident; [$($acc:tt)*];
     @no_wrapper $method:ident($($arg:ident: $argty:ty),* $(,)?) $(-> $ret:ty)?;
     $($rest:tt)*) => {
        $crate::__define_service_table! {
            $table;
            [$($acc)* pub $method: fn($($argty),*) $(-> $ret)?,];
            $($rest)*
        }
    };
    ($table:ident; [$($acc:tt)*];
     $method:ident($($arg:ident: $argty:ty),* $(,)?) $(-> $ret:ty)?;
     $($rest:tt)*) => {
        $crate::__define_service_table! {
            $table;
            [$($acc)* pub $method: fn($($argty),*) $(-> $ret)?,];
            $($rest)*
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __define_service_wrappers {
    ($service:ident;) => {};
    ($service:ident;
     @no_wrapper $method:ident($($arg:ident: $argty:ty),* $(,)?) $(-> $ret:ty)?;
     $($rest:tt)*) => {
        $crate::__define_service_wrappers! { $service; $($rest)* }
    };
    ($service:ident;
     $method:ident($($arg:ident: $argty:ty),* $(,)?) $(-> $ret:ty)?;
     $($rest:tt)*) => {
        $crate::paste::paste! {
            #[inline(always)]
            pub fn $method($($arg: $argty),*) $(-> $ret)? {
                ([<$service _services>]().$method)($($arg),*)
            }
        }
        $crate::__define_service_wrappers! { $service; $($rest)* }
    };
}
