use std::ptr;

/// Length-checked read access to a region of a task's address space.
///
/// The CFA evaluator never dereferences task memory directly; all access
/// goes through this capability so the same engine can run against the
/// current process, a suspended task, or a captured snapshot. A read that
/// touches an unmapped or otherwise unreadable address must return `None`
/// instead of faulting the caller.
pub trait Memory {
    /// Read `buf.len()` bytes at the task-relative `address`.
    ///
    /// Returns `None` if any byte in the range is not readable.
    fn read(&self, address: u64, buf: &mut [u8]) -> Option<()>;
}

/// A [Memory] backed by a byte slice mapped at a fixed base address.
///
/// Used for captured memory snapshots and for tests.
#[derive(Debug, Copy, Clone)]
pub struct SliceMemory<'a> {
    base: u64,
    data: &'a [u8],
}

impl<'a> SliceMemory<'a> {
    pub fn new(base: u64, data: &'a [u8]) -> Self {
        Self { base, data }
    }

    /// The first task-relative address covered by this region.
    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The region's size in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

impl Memory for SliceMemory<'_> {
    fn read(&self, address: u64, buf: &mut [u8]) -> Option<()> {
        let start = address.checked_sub(self.base)? as usize;
        let end = start.checked_add(buf.len())?;
        if end > self.data.len() {
            return None;
        }
        buf.copy_from_slice(&self.data[start..end]);
        Some(())
    }
}

/// A [Memory] over the current process's own address space.
///
/// Addresses come from the CFI data of a faulted process, so with the
/// `mem-protect` feature enabled every read is preceded by a kernel probe
/// of the first and last byte; an invalid address fails the read instead
/// of raising a second fault inside the crash handler.
#[derive(Debug, Default, Copy, Clone)]
pub struct LocalMemory;

impl Memory for LocalMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Option<()> {
        if buf.is_empty() {
            return Some(());
        }
        #[cfg(feature = "mem-protect")]
        {
            let last = address.checked_add(buf.len() as u64 - 1)?;
            if !can_access(address) || !can_access(last) {
                return None;
            }
        }
        unsafe {
            ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Some(())
    }
}

#[cfg(feature = "mem-protect")]
use std::mem::MaybeUninit;

#[cfg(feature = "mem-protect")]
thread_local! {
    static CAN_ACCESS_PIPE: [libc::c_int; 2] = {
        unsafe {
            let mut fds = MaybeUninit::<[libc::c_int; 2]>::uninit();
            if create_pipe(fds.as_mut_ptr() as *mut libc::c_int) == 0 {
                fds.assume_init()
            } else {
                [-1, -1]
            }
        }
    };
}

/// Check whether the target address is readable by asking the kernel to
/// copy one byte from it (a `write` to a pipe fails with EFAULT on a bad
/// source address, without faulting us).
#[cfg(feature = "mem-protect")]
fn can_access(address: u64) -> bool {
    CAN_ACCESS_PIPE.with(|pipes| unsafe {
        if pipes[0] == -1 || pipes[1] == -1 {
            return false;
        }
        // Drain anything left over from a previous probe so the write
        // below cannot block on a full pipe.
        let mut buffer = [0u8; 8];
        let drained = loop {
            let size = libc::read(pipes[0], buffer.as_mut_ptr() as _, buffer.len() as _);
            if size == -1 {
                match errno() {
                    libc::EINTR => continue,
                    libc::EAGAIN => break true,
                    _ => break false,
                }
            } else if size > 0 {
                break true;
            }
        };
        if !drained {
            return false;
        }
        loop {
            let size = libc::write(pipes[1], address as _, 1);
            if size == -1 {
                match errno() {
                    libc::EINTR => continue,
                    libc::EAGAIN => break true,
                    _ => break false,
                }
            } else if size > 0 {
                break true;
            }
        }
    })
}

#[inline]
#[cfg(all(feature = "mem-protect", target_os = "linux"))]
unsafe fn create_pipe(fds: *mut libc::c_int) -> libc::c_int {
    libc::pipe2(fds, libc::O_CLOEXEC | libc::O_NONBLOCK)
}

#[cfg(all(feature = "mem-protect", target_os = "macos"))]
unsafe fn create_pipe(fds: *mut libc::c_int) -> libc::c_int {
    let res = libc::pipe(fds);
    if res != 0 {
        return res;
    }
    let fds = fds as *mut [libc::c_int; 2];
    for n in 0..2 {
        let flags = libc::fcntl((*fds)[n], libc::F_GETFD) | libc::O_CLOEXEC;
        if libc::fcntl((*fds)[n], libc::F_SETFD, flags) != 0 {
            return -1;
        }
        let flags = libc::fcntl((*fds)[n], libc::F_GETFL) | libc::O_NONBLOCK;
        if libc::fcntl((*fds)[n], libc::F_SETFL, flags) != 0 {
            return -1;
        }
    }
    0
}

#[inline]
#[cfg(all(feature = "mem-protect", target_os = "linux"))]
fn errno() -> libc::c_int {
    unsafe { (*libc::__errno_location()) as libc::c_int }
}

#[inline]
#[cfg(all(feature = "mem-protect", target_os = "macos"))]
fn errno() -> libc::c_int {
    unsafe { (*libc::__error()) as libc::c_int }
}
