//! Free disk space checks for the data directory.

use std::path::{Path, PathBuf};

/// Minimum disk space in bytes required to start recording (50 MB)
pub const MIN_DISK_SPACE_BYTES: u64 = 50 * 1024 * 1024;

/// Warning threshold for low disk space (500 MB)
pub const LOW_DISK_SPACE_WARNING_BYTES: u64 = 500 * 1024 * 1024;

/// Storage status of the volume holding the local database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStatus {
    /// Plenty of storage available
    Ok,
    /// Storage is running low (warning threshold)
    Low,
    /// Storage is critically low (recording must not start)
    Critical,
    /// Unable to determine storage status
    Unknown,
}

impl StorageStatus {
    /// Classify a free-byte count.
    pub fn from_free_bytes(free_bytes: u64) -> Self {
        if free_bytes < MIN_DISK_SPACE_BYTES {
            StorageStatus::Critical
        } else if free_bytes < LOW_DISK_SPACE_WARNING_BYTES {
            StorageStatus::Low
        } else {
            StorageStatus::Ok
        }
    }
}

/// Source of storage status consulted before a session starts.
pub trait StorageGuard: Send + Sync {
    fn status(&self) -> StorageStatus;
}

/// Checks the real volume containing `path`.
#[derive(Debug, Clone)]
pub struct DiskStorageGuard {
    path: PathBuf,
}

impl DiskStorageGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StorageGuard for DiskStorageGuard {
    fn status(&self) -> StorageStatus {
        check_disk_space(&self.path)
    }
}

/// A guard that always reports the same status.
#[derive(Debug, Clone, Copy)]
pub struct FixedStorageGuard(pub StorageStatus);

impl StorageGuard for FixedStorageGuard {
    fn status(&self) -> StorageStatus {
        self.0
    }
}

/// Check available disk space for a path.
pub fn check_disk_space(path: &Path) -> StorageStatus {
    match free_bytes(path) {
        Some(free) => StorageStatus::from_free_bytes(free),
        None => StorageStatus::Unknown,
    }
}

#[cfg(target_os = "windows")]
fn free_bytes(path: &Path) -> Option<u64> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;

    // Get the drive root from the path
    let root = path
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .unwrap_or_else(|| "C:\\".to_string());
    let root = if root.ends_with('\\') || root.ends_with('/') {
        root
    } else {
        format!("{}\\", root)
    };

    let root_wide: Vec<u16> = OsStr::new(&root)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let mut free_bytes_available: u64 = 0;
    let mut total_bytes: u64 = 0;
    let mut total_free_bytes: u64 = 0;

    let result = unsafe {
        windows_sys::Win32::Storage::FileSystem::GetDiskFreeSpaceExW(
            root_wide.as_ptr(),
            &mut free_bytes_available,
            &mut total_bytes,
            &mut total_free_bytes,
        )
    };

    if result == 0 {
        tracing::warn!("Failed to get disk space for {}", root);
        return None;
    }
    Some(free_bytes_available)
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> Option<u64> {
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    // statvfs needs an existing path; walk up to the nearest one.
    let existing = path.ancestors().find(|p| p.exists()).unwrap_or(Path::new("."));
    let c_path = std::ffi::CString::new(existing.as_os_str().as_bytes()).ok()?;

    let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

    if result != 0 {
        tracing::warn!("Failed to get disk space for {}", existing.display());
        return None;
    }

    let stat = unsafe { stat.assume_init() };
    #[allow(clippy::unnecessary_cast)]
    let free = stat.f_bavail as u64 * stat.f_frsize as u64;
    Some(free)
}

#[cfg(not(any(unix, target_os = "windows")))]
fn free_bytes(_path: &Path) -> Option<u64> {
    None
}
