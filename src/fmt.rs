//! Logging shims. Embedded builds without `std` log through `defmt` when the feature is on,
//! everything else goes through `tracing`.
#![allow(unused_macros)]

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(all(feature = "defmt", not(feature = "std")))]
        ::defmt::trace!($($arg)*);
        #[cfg(not(all(feature = "defmt", not(feature = "std"))))]
        ::tracing::trace!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(all(feature = "defmt", not(feature = "std")))]
        ::defmt::debug!($($arg)*);
        #[cfg(not(all(feature = "defmt", not(feature = "std"))))]
        ::tracing::debug!($($arg)*);
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(all(feature = "defmt", not(feature = "std")))]
        ::defmt::info!($($arg)*);
        #[cfg(not(all(feature = "defmt", not(feature = "std"))))]
        ::tracing::info!($($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(all(feature = "defmt", not(feature = "std")))]
        ::defmt::warn!($($arg)*);
        #[cfg(not(all(feature = "defmt", not(feature = "std"))))]
        ::tracing::warn!($($arg)*);
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(all(feature = "defmt", not(feature = "std")))]
        ::defmt::error!($($arg)*);
        #[cfg(not(all(feature = "defmt", not(feature = "std"))))]
        ::tracing::error!($($arg)*);
    }};
}
