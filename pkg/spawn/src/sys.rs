//! Low-level, async-signal-safe child-side operations.
//!
//! Everything invoked between `fork()` and `execve()`/`_exit()` in
//! [`child_pre_exec_and_exec`] must avoid heap allocation and panics: the
//! child is a single-threaded copy of a process that may otherwise be
//! multi-threaded, and the Rust allocator or unwinder may be holding locks
//! from other threads at the moment of `fork()`.

use std::ffi::CStr;
use std::fs::File;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};

use nix::errno::Errno;

use crate::{SpawnAttributes, SpawnError};

/// Upper bound on `file_handles.len()`, chosen so the child-side fd shuffle
/// can use fixed-size stack arrays instead of allocating.
pub const MAX_FILE_HANDLES: usize = 128;

pub fn pipe_cloexec() -> std::io::Result<(File, File)> {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: pipe2 just populated these as valid, owned fds.
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Read the relayed child errno, if any. `None` means the child reached
/// `execve` successfully (the pipe closed on exec with no bytes written).
pub fn read_child_errno(mut pipe_r: File) -> Option<Errno> {
    let mut buf = [0u8; 4];
    let mut filled = 0usize;
    loop {
        match std::io::Read::read(&mut pipe_r, &mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if filled == buf.len() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    if filled == 0 {
        None
    } else {
        Some(Errno::from_raw(i32::from_ne_bytes(buf)))
    }
}

/// Write `errno` to the sync pipe (best-effort) and `_exit(127)`. Never
/// returns.
fn fail(pipe_w: RawFd, errno: i32) -> ! {
    let bytes = errno.to_ne_bytes();
    unsafe {
        libc::write(pipe_w, bytes.as_ptr() as *const libc::c_void, bytes.len());
        libc::_exit(127);
    }
}

fn set_cloexec(fd: RawFd, on: bool) -> Result<(), Errno> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(Errno::last());
    }
    let new_flags = if on {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFD, new_flags) } < 0 {
        return Err(Errno::last());
    }
    Ok(())
}

/// The child-side body: fd shuffle, session/ctty, credentials, `chdir`,
/// `execve`. Never returns — either `execve` replaces the image or we
/// relay an errno over `pipe_w` and `_exit(127)`.
///
/// `argv_ptrs`/`envp_ptrs` must already be null-terminated pointer arrays
/// built by the parent *before* `fork()`: building them here would allocate
/// after fork, which is unsafe in a process that may have other threads.
pub fn child_pre_exec_and_exec(
    path: &CStr,
    argv_ptrs: &[*const libc::c_char],
    envp_ptrs: &[*const libc::c_char],
    file_handles: &[RawFd],
    cwd: Option<&CStr>,
    attrs: &SpawnAttributes,
    pipe_w: File,
) -> ! {
    let pipe_w_fd = pipe_w.into_raw_fd();

    macro_rules! tryc {
        ($e:expr) => {
            match $e {
                Ok(v) => v,
                Err(errno) => fail(pipe_w_fd, errno as i32),
            }
        };
    }

    // Reset every signal disposition to default and clear the signal mask
    // the parent set up before fork().
    for sig in 1..=31 {
        unsafe {
            libc::signal(sig, libc::SIG_DFL);
        }
    }
    unsafe {
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
    }

    if file_handles.len() > MAX_FILE_HANDLES {
        fail(pipe_w_fd, libc::EINVAL);
    }

    // ── fd shuffle ──────────────────────────────────────────────────
    //
    // Move the sync pipe and any file_handles that would otherwise be
    // clobbered by the final dup2 pass into a staging area strictly above
    // every source fd, every destination fd, and the pipe itself, then
    // dup2 from staging into the final low positions. This lets
    // file_handles be an arbitrary permutation (including fds that already
    // sit in the 0..N range, just not where they're wanted).
    let n = file_handles.len();
    let mut max_fd = pipe_w_fd;
    for &fd in file_handles {
        if fd > max_fd {
            max_fd = fd;
        }
    }
    if (n as i32 - 1) > max_fd {
        max_fd = n as i32 - 1;
    }

    let new_pipe_w = max_fd + 1;
    if new_pipe_w != pipe_w_fd {
        tryc!(dup2_checked(pipe_w_fd, new_pipe_w));
        unsafe { libc::close(pipe_w_fd) };
    }
    let pipe_w_fd = new_pipe_w;
    tryc!(set_cloexec(pipe_w_fd, true).map_err(|e| e as i32));

    let mut staged = [-1i32; MAX_FILE_HANDLES];
    for (i, &fd) in file_handles.iter().enumerate() {
        if fd != i as i32 {
            let target = pipe_w_fd + 1 + i as i32;
            tryc!(dup2_checked(fd, target));
            tryc!(set_cloexec(target, true).map_err(|e| e as i32));
            staged[i] = target;
        }
    }
    for (i, &fd) in file_handles.iter().enumerate() {
        if fd != i as i32 {
            tryc!(dup2_checked(staged[i], i as i32));
        }
        tryc!(set_cloexec(i as i32, false).map_err(|e| e as i32));
    }

    // ── session / pgid / ctty ───────────────────────────────────────
    if attrs.setsid {
        if unsafe { libc::setsid() } < 0 {
            fail(pipe_w_fd, unsafe { *libc::__errno_location() });
        }
    }
    if attrs.setpgid {
        if unsafe { libc::setpgid(0, attrs.pgid) } != 0 {
            fail(pipe_w_fd, unsafe { *libc::__errno_location() });
        }
    }
    if attrs.setctty {
        let zero: libc::c_int = 0;
        if unsafe { libc::ioctl(attrs.ctty, libc::TIOCSCTTY as _, zero) } != 0 {
            fail(pipe_w_fd, unsafe { *libc::__errno_location() });
        }
    }

    // ── close-on-exec everything above N ────────────────────────────
    //
    // This is also what closes the staging copies and the sync pipe on a
    // successful execve: they are all >= N and all get CLOEXEC here.
    let rlimit = unsafe {
        let mut rl: libc::rlimit = std::mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) == 0 {
            rl.rlim_cur as i32
        } else {
            1024
        }
    };
    for fd in (n as i32)..rlimit {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            continue; // EBADF or similar — nothing to close-on-exec
        }
        unsafe {
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }

    // ── credentials (gid before uid, per spec) ──────────────────────
    if let Some(gid) = attrs.gid {
        if unsafe { libc::setgid(gid) } != 0 {
            fail(pipe_w_fd, unsafe { *libc::__errno_location() });
        }
    }
    if let Some(uid) = attrs.uid {
        if unsafe { libc::setreuid(uid, uid) } != 0 {
            fail(pipe_w_fd, unsafe { *libc::__errno_location() });
        }
    }

    // ── cwd ──────────────────────────────────────────────────────────
    if let Some(cwd) = cwd {
        if unsafe { libc::chdir(cwd.as_ptr()) } != 0 {
            fail(pipe_w_fd, unsafe { *libc::__errno_location() });
        }
    }

    // ── execve ───────────────────────────────────────────────────────
    unsafe {
        libc::execve(path.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
    }
    fail(pipe_w_fd, unsafe { *libc::__errno_location() });
}

fn dup2_checked(src: RawFd, dst: RawFd) -> Result<(), i32> {
    if unsafe { libc::dup2(src, dst) } < 0 {
        Err(unsafe { *libc::__errno_location() })
    } else {
        Ok(())
    }
}
