//! POSIX shared-memory mapping used as the backing store of the frame ring.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

/// Longest portable shared-memory object name, leading slash included.
pub const MAX_NAME_LEN: usize = 31;

/// A mapped shared-memory object.
///
/// The creating side owns the name and unlinks it on drop; attached mappings
/// only unmap.
pub(crate) struct SharedMapping {
    ptr: NonNull<u8>,
    len: usize,
    name: CString,
    owner: bool,
}

// The mapping is plain memory; all cross-process coordination goes through
// atomics in the ring header.
unsafe impl Send for SharedMapping {}
unsafe impl Sync for SharedMapping {}

/// Normalise `name` to the `/name` form required by `shm_open`.
pub(crate) fn object_name(name: &str) -> Result<CString, String> {
    let trimmed = name.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('\0') {
        return Err(format!("invalid shared memory name: {:?}", name));
    }
    if trimmed.len() + 1 > MAX_NAME_LEN {
        return Err(format!(
            "shared memory name too long: {} chars (max {})",
            trimmed.len() + 1,
            MAX_NAME_LEN
        ));
    }
    CString::new(format!("/{}", trimmed)).map_err(|e| e.to_string())
}

#[cfg(unix)]
impl SharedMapping {
    /// Create a new zero-filled object of `len` bytes. Fails if the name exists.
    pub(crate) fn create(name: CString, len: usize) -> io::Result<Self> {
        let fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mapped = if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            Err(io::Error::last_os_error())
        } else {
            map_fd(fd, len)
        };
        unsafe { libc::close(fd) };

        match mapped {
            Ok(ptr) => Ok(Self {
                ptr,
                len,
                name,
                owner: true,
            }),
            Err(e) => {
                unsafe { libc::shm_unlink(name.as_ptr()) };
                Err(e)
            }
        }
    }

    /// Map an existing object at its full size.
    pub(crate) fn open(name: CString) -> io::Result<Self> {
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0 as libc::c_uint) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        let mapped = if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            Err(io::Error::last_os_error())
        } else if stat.st_size <= 0 {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shared memory object is empty",
            ))
        } else {
            let len = stat.st_size as usize;
            map_fd(fd, len).map(|ptr| (ptr, len))
        };
        unsafe { libc::close(fd) };

        let (ptr, len) = mapped?;
        Ok(Self {
            ptr,
            len,
            name,
            owner: false,
        })
    }

    /// Whether an object with this name currently exists.
    pub(crate) fn exists(name: &CString) -> bool {
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDONLY, 0 as libc::c_uint) };
        if fd < 0 {
            return false;
        }
        unsafe { libc::close(fd) };
        true
    }
}

#[cfg(unix)]
fn map_fd(fd: libc::c_int, len: usize) -> io::Result<NonNull<u8>> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr as *mut u8).ok_or_else(|| io::Error::other("mmap returned null"))
}

#[cfg(not(unix))]
impl SharedMapping {
    pub(crate) fn create(_name: CString, _len: usize) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "shared memory frame ring requires a Unix platform",
        ))
    }

    pub(crate) fn open(_name: CString) -> io::Result<Self> {
        Self::create(CString::default(), 0)
    }

    pub(crate) fn exists(_name: &CString) -> bool {
        false
    }
}

impl SharedMapping {
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn name(&self) -> &CString {
        &self.name
    }

    pub(crate) fn is_owner(&self) -> bool {
        self.owner
    }
}

impl Drop for SharedMapping {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
            if self.owner {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}
