//! Macros for building and returning [`crate::error::SyncError`] values.

/// Creates a [`crate::error::SyncError`] from an error kind, a static description and an
/// optional detail.
#[macro_export]
macro_rules! sync_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::SyncError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::SyncError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::SyncError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::sync_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::sync_error!($kind, $desc, $detail))
    };
}
