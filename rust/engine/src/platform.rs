//! Platform helpers: alignment, process identity and ptrace permission

use heapxfer_core::{Result, TransferError};
use nix::unistd::Pid;
use tracing::debug;

/// Alignment of non-mapped parent heaps
pub const HEAP_ALIGNMENT: usize = 64 * 1024;

/// Platform-specific utilities
pub struct PlatformUtils;

impl PlatformUtils {
    /// Get current process ID
    pub fn process_id() -> Pid {
        nix::unistd::getpid()
    }

    /// Get parent process ID
    pub fn parent_process_id() -> Pid {
        nix::unistd::getppid()
    }

    /// Round `value` up to a multiple of `align` (a power of two)
    pub fn align_up(value: usize, align: usize) -> usize {
        debug_assert!(align.is_power_of_two());
        (value + align - 1) & !(align - 1)
    }

    /// Allow `tracer` to access this process's memory under Yama
    ///
    /// Without Yama the call fails with EINVAL and access is governed by
    /// plain credentials, so failure is only logged.
    pub fn grant_memory_access(tracer: Pid) {
        let rc = unsafe {
            libc::prctl(
                libc::PR_SET_PTRACER,
                tracer.as_raw() as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        };
        if rc == -1 {
            debug!(
                "PR_SET_PTRACER {} not applied: {}",
                tracer,
                std::io::Error::last_os_error()
            );
        }
    }

    /// Withdraw a grant made by [`PlatformUtils::grant_memory_access`]
    pub fn revoke_memory_access() {
        unsafe {
            libc::prctl(
                libc::PR_SET_PTRACER,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            );
        }
    }

    /// Check whether the kernel lets this process use the cross-process memory calls
    pub fn cross_process_memory_supported() -> bool {
        let source = [0x5Au8; 16];
        let mut target = [0u8; 16];
        let result = crate::remote::RemoteProcess::new(Self::process_id())
            .read_into(source.as_ptr() as usize, &mut target);
        matches!(result, Ok(16)) && target == source
    }
}

/// Convert an `Errno` into a transfer error naming the primitive
pub(crate) fn os_error(op: &'static str) -> impl FnOnce(nix::errno::Errno) -> TransferError {
    move |errno| TransferError::os(op, std::io::Error::from(errno))
}

/// Ensure an OS primitive moved exactly the expected number of bytes
pub(crate) fn expect_len(op: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(TransferError::ShortTransfer {
            op,
            actual: actual as u64,
            expected: expected as u64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert_eq!(PlatformUtils::align_up(1, HEAP_ALIGNMENT), HEAP_ALIGNMENT);
        assert_eq!(PlatformUtils::align_up(HEAP_ALIGNMENT, HEAP_ALIGNMENT), HEAP_ALIGNMENT);
        assert_eq!(PlatformUtils::align_up(0, HEAP_ALIGNMENT), 0);
        assert_eq!(PlatformUtils::align_up(1000, 4096), 4096);
    }

    #[test]
    fn test_process_ids() {
        assert!(PlatformUtils::process_id().as_raw() > 0);
        assert_ne!(PlatformUtils::process_id(), PlatformUtils::parent_process_id());
    }

    #[test]
    fn test_expect_len() {
        assert!(expect_len("write", 10, 10).is_ok());
        assert!(matches!(
            expect_len("write", 9, 10),
            Err(TransferError::ShortTransfer { actual: 9, expected: 10, .. })
        ));
    }
}
