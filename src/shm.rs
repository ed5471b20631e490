//! Named shared memory regions.
//!
//! Each region is a POSIX shared memory object laid out as:
//!
//! ```text
//! +--------------------------------------------+
//! | RegionHeader (repr(C))                     |
//! |   size: u32          payload length        |
//! |   mutex              PTHREAD_PROCESS_SHARED |
//! |   condition          PTHREAD_PROCESS_SHARED |
//! +--------------------------------------------+
//! | payload: `size` bytes                      |
//! +--------------------------------------------+
//! ```
//!
//! The producer owns a `PublishedBuffer` (creates the object, writes under the
//! lock, broadcasts on the condition, unlinks the name on drop). Consumers hold
//! a `SubscribedBuffer` (attach by name, wait for a broadcast, read under the
//! lock). Consumers only ever get read access to the payload.
//!
//! Protocol per update: lock -> write -> unlock -> notify_all. Readers lock
//! before reading, so a read never observes a write in progress.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::io;
use std::ops::{Deref, DerefMut};
use std::ptr::{addr_of_mut, NonNull};
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use crate::error::PublisherError;

#[repr(C)]
struct RegionHeader {
    size: u32,
    mutex: libc::pthread_mutex_t,
    condition: libc::pthread_cond_t,
}

const HEADER_LEN: usize = std::mem::size_of::<RegionHeader>();

// ----------------------------------------------------------------------------
// Mapping: the raw shm object
// ----------------------------------------------------------------------------

struct Mapping {
    name: String,
    path: CString,
    fd: libc::c_int,
    base: NonNull<u8>,
    map_len: usize,
    payload_len: usize,
    owner: bool,
}

// The payload is only touched while the process-shared mutex is held (or by
// the single producer between its own locked writes), and the header holds
// nothing but pthread objects that are safe to use from any thread.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn create(name: &str, payload_len: usize) -> io::Result<Self> {
        let size = u32::try_from(payload_len)
            .ok()
            .filter(|&size| size > 0)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("region size {payload_len} must be between 1 and u32::MAX"),
                )
            })?;
        let path = region_path(name)?;
        let map_len = HEADER_LEN + payload_len;

        let fd = unsafe {
            libc::shm_open(
                path.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o660 as libc::mode_t,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let cleanup = |err: io::Error| {
            unsafe {
                libc::close(fd);
                libc::shm_unlink(path.as_ptr());
            }
            err
        };

        if unsafe { libc::ftruncate(fd, map_len as libc::off_t) } != 0 {
            return Err(cleanup(io::Error::last_os_error()));
        }
        let base = map_shared(fd, map_len).map_err(cleanup)?;

        let header = base.as_ptr() as *mut RegionHeader;
        if let Err(err) = unsafe { init_header(header, size) } {
            unsafe { libc::munmap(base.as_ptr() as *mut libc::c_void, map_len) };
            return Err(cleanup(err));
        }

        Ok(Self {
            name: name.to_string(),
            path,
            fd,
            base,
            map_len,
            payload_len,
            owner: true,
        })
    }

    fn attach(name: &str) -> io::Result<Self> {
        let path = region_path(name)?;
        let fd = unsafe { libc::shm_open(path.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let close_on_err = |err: io::Error| {
            unsafe { libc::close(fd) };
            err
        };

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            return Err(close_on_err(io::Error::last_os_error()));
        }
        let map_len = st.st_size as usize;
        if map_len < HEADER_LEN {
            return Err(close_on_err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("region '{name}' is smaller than its header"),
            )));
        }

        let base = map_shared(fd, map_len).map_err(close_on_err)?;
        let header = base.as_ptr() as *const RegionHeader;
        // `size` is written last by the creator; a matching size means the
        // mutex and condition are initialised.
        let payload_len = unsafe { std::ptr::addr_of!((*header).size).read_volatile() } as usize;
        fence(Ordering::Acquire);
        if payload_len == 0 || HEADER_LEN + payload_len != map_len {
            unsafe { libc::munmap(base.as_ptr() as *mut libc::c_void, map_len) };
            return Err(close_on_err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("region '{name}' not initialised yet ({payload_len} of {map_len} bytes)"),
            )));
        }

        Ok(Self {
            name: name.to_string(),
            path,
            fd,
            base,
            map_len,
            payload_len,
            owner: false,
        })
    }

    fn header(&self) -> *mut RegionHeader {
        self.base.as_ptr() as *mut RegionHeader
    }

    fn mutex(&self) -> *mut libc::pthread_mutex_t {
        unsafe { addr_of_mut!((*self.header()).mutex) }
    }

    fn condition(&self) -> *mut libc::pthread_cond_t {
        unsafe { addr_of_mut!((*self.header()).condition) }
    }

    fn payload(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(HEADER_LEN) }
    }

    fn lock(&self) -> io::Result<Locked<'_>> {
        check(unsafe { libc::pthread_mutex_lock(self.mutex()) })?;
        Ok(Locked { mapping: self })
    }

    fn notify_all(&self) -> io::Result<()> {
        check(unsafe { libc::pthread_cond_broadcast(self.condition()) })
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let _locked = self.lock()?;
        let rc = match timeout {
            None => unsafe { libc::pthread_cond_wait(self.condition(), self.mutex()) },
            Some(timeout) => {
                let deadline = deadline_after(timeout);
                unsafe { libc::pthread_cond_timedwait(self.condition(), self.mutex(), &deadline) }
            }
        };
        match rc {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            rc => Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.map_len);
            libc::close(self.fd);
            if self.owner {
                // Existing consumer mappings stay valid; only the name goes away.
                libc::shm_unlink(self.path.as_ptr());
            }
        }
    }
}

/// Holds the region mutex; unlocks on drop.
struct Locked<'a> {
    mapping: &'a Mapping,
}

impl Drop for Locked<'_> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.mapping.mutex()) };
        if rc != 0 {
            log::error!(
                "failed to unlock shared memory '{}': {}",
                self.mapping.name,
                io::Error::from_raw_os_error(rc)
            );
        }
    }
}

fn region_path(name: &str) -> io::Result<CString> {
    let bare = name.strip_prefix('/').unwrap_or(name);
    if bare.is_empty() || bare.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid shared memory name '{name}'"),
        ));
    }
    CString::new(format!("/{bare}")).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("shared memory name '{name}' contains NUL"),
        )
    })
}

fn map_shared(fd: libc::c_int, len: usize) -> io::Result<NonNull<u8>> {
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
    NonNull::new(ptr as *mut u8)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
}

unsafe fn init_header(header: *mut RegionHeader, size: u32) -> io::Result<()> {

    let mut mutex_attr: libc::pthread_mutexattr_t = std::mem::zeroed();
    check(libc::pthread_mutexattr_init(&mut mutex_attr))?;
    let rc = libc::pthread_mutexattr_setpshared(&mut mutex_attr, libc::PTHREAD_PROCESS_SHARED);
    let rc = if rc == 0 {
        libc::pthread_mutex_init(addr_of_mut!((*header).mutex), &mutex_attr)
    } else {
        rc
    };
    libc::pthread_mutexattr_destroy(&mut mutex_attr);
    check(rc)?;

    let mut cond_attr: libc::pthread_condattr_t = std::mem::zeroed();
    check(libc::pthread_condattr_init(&mut cond_attr))?;
    let rc = libc::pthread_condattr_setpshared(&mut cond_attr, libc::PTHREAD_PROCESS_SHARED);
    let rc = if rc == 0 {
        libc::pthread_cond_init(addr_of_mut!((*header).condition), &cond_attr)
    } else {
        rc
    };
    libc::pthread_condattr_destroy(&mut cond_attr);
    check(rc)?;

    // Publish the size only once the header is usable; `attach` keys on it.
    fence(Ordering::Release);
    addr_of_mut!((*header).size).write_volatile(size);
    Ok(())
}

fn deadline_after(timeout: Duration) -> libc::timespec {
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
    let mut secs = now.tv_sec as i64 + timeout.as_secs() as i64;
    let mut nanos = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    let mut deadline: libc::timespec = unsafe { std::mem::zeroed() };
    deadline.tv_sec = secs as libc::time_t;
    deadline.tv_nsec = nanos as _;
    deadline
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

// ----------------------------------------------------------------------------
// PublishedBuffer: producer side
// ----------------------------------------------------------------------------

/// A named region created and written by the producer.
///
/// The name is removed from the system when the buffer is dropped.
pub struct PublishedBuffer {
    mapping: Mapping,
}

impl PublishedBuffer {
    /// Create a region of exactly `size` payload bytes under `name`.
    ///
    /// Fails with `PublisherError::ResourceAllocation` if the name is already
    /// taken or the object cannot be sized or mapped.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let mapping =
            Mapping::create(name, size).map_err(|source| PublisherError::ResourceAllocation {
                name: name.to_string(),
                source,
            })?;
        Ok(Self { mapping })
    }

    pub fn name(&self) -> &str {
        &self.mapping.name
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.mapping.payload_len
    }

    /// Take the region lock for writing. Not reentrant.
    pub fn lock(&self) -> Result<WriteGuard<'_>> {
        let locked = self
            .mapping
            .lock()
            .with_context(|| format!("lock shared memory '{}'", self.mapping.name))?;
        Ok(WriteGuard { locked })
    }

    /// Wake every consumer waiting on this region. Call after the guard is dropped.
    pub fn notify_all(&self) -> Result<()> {
        self.mapping
            .notify_all()
            .with_context(|| format!("notify consumers of '{}'", self.mapping.name))
    }

    /// The last frame this producer wrote, read without taking the lock.
    ///
    /// Sound because consumers never write and `&mut self` rules out a live
    /// `WriteGuard` on this handle.
    pub fn last_written(&mut self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.mapping.payload(), self.mapping.payload_len) }
    }
}

impl std::fmt::Debug for PublishedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedBuffer")
            .field("name", &self.mapping.name)
            .field("size", &self.mapping.payload_len)
            .finish()
    }
}

/// Exclusive write access to a published region's payload.
pub struct WriteGuard<'a> {
    locked: Locked<'a>,
}

impl Deref for WriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let mapping = self.locked.mapping;
        unsafe { std::slice::from_raw_parts(mapping.payload(), mapping.payload_len) }
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let mapping = self.locked.mapping;
        unsafe { std::slice::from_raw_parts_mut(mapping.payload(), mapping.payload_len) }
    }
}

// ----------------------------------------------------------------------------
// SubscribedBuffer: consumer side
// ----------------------------------------------------------------------------

/// A consumer's view of a region published by another process (or thread).
pub struct SubscribedBuffer {
    mapping: Mapping,
}

impl SubscribedBuffer {
    pub fn attach(name: &str) -> Result<Self> {
        let mapping =
            Mapping::attach(name).with_context(|| format!("attach shared memory '{name}'"))?;
        Ok(Self { mapping })
    }

    pub fn name(&self) -> &str {
        &self.mapping.name
    }

    pub fn size(&self) -> usize {
        self.mapping.payload_len
    }

    /// Take the region lock for reading.
    pub fn lock(&self) -> Result<ReadGuard<'_>> {
        let locked = self
            .mapping
            .lock()
            .with_context(|| format!("lock shared memory '{}'", self.mapping.name))?;
        Ok(ReadGuard { locked })
    }

    /// Block until the producer broadcasts. Spurious wakeups are possible.
    pub fn wait(&self) -> Result<()> {
        self.mapping
            .wait(None)
            .with_context(|| format!("wait on shared memory '{}'", self.mapping.name))?;
        Ok(())
    }

    /// Like `wait`, returning `false` if nothing arrived within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.mapping
            .wait(Some(timeout))
            .with_context(|| format!("wait on shared memory '{}'", self.mapping.name))
    }
}

/// Shared read access to a subscribed region's payload.
pub struct ReadGuard<'a> {
    locked: Locked<'a>,
}

impl Deref for ReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let mapping = self.locked.mapping;
        unsafe { std::slice::from_raw_parts(mapping.payload(), mapping.payload_len) }
    }
}
