//! Permission helpers that keep yank's on-disk state private to the
//! daemon user.
//!
//! Clipboard payloads are arbitrary user data, so the clipboard directory
//! must be mode 0700 and every payload/meta file mode 0600. On non-Unix
//! targets these functions are no-ops; the daemon's streaming mode needs a
//! POSIX named pipe anyway, so Unix is the primary target.

use std::io;
use std::path::Path;

/// Result of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixResult {
    /// Permissions were already correct.
    AlreadySecure,
    /// Permissions were changed.
    Fixed,
    /// The path does not exist (not an error for optional paths).
    NotFound,
}

/// Set the process umask to 0o077 so newly created files come out 0600 and
/// directories 0700. Call once, early in main, before any files are created.
#[inline]
pub fn set_restrictive_umask() {
    #[cfg(unix)]
    {
        // SAFETY: umask only mutates the process file-creation mask.
        unsafe {
            libc::umask(0o077);
        }
    }
}

/// Ensure a directory is only accessible by the current user (mode 0700).
pub fn secure_dir(path: &Path) -> io::Result<FixResult> {
    if !path.exists() {
        return Ok(FixResult::NotFound);
    }

    #[cfg(unix)]
    {
        unix::ensure_mode(path, 0o700)
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(FixResult::AlreadySecure)
    }
}

/// Ensure a file is only accessible by the current user (mode 0600).
pub fn secure_file(path: &Path) -> io::Result<FixResult> {
    if !path.exists() {
        return Ok(FixResult::NotFound);
    }

    #[cfg(unix)]
    {
        unix::ensure_mode(path, 0o600)
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(FixResult::AlreadySecure)
    }
}

#[cfg(unix)]
mod unix {
    use std::fs;
    use std::io;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use super::FixResult;

    const PERMISSION_MASK: u32 = 0o777;

    pub fn ensure_mode(path: &Path, want: u32) -> io::Result<FixResult> {
        let metadata = fs::metadata(path)?;
        if metadata.permissions().mode() & PERMISSION_MASK == want {
            return Ok(FixResult::AlreadySecure);
        }

        let mut perms = metadata.permissions();
        perms.set_mode(want);
        fs::set_permissions(path, perms)?;
        Ok(FixResult::Fixed)
    }
}
