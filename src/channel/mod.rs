//! POSIX message queue carrying lease events from the handler to the supervisor.
//!
//! The supervisor side ([`EventChannel`]) creates the queue exclusively and
//! reads it through the tokio reactor; the handler side ([`ChannelSender`])
//! opens the existing queue write-only and publishes one message per event.

use crate::error::ChannelError;
use bytes::{Bytes, BytesMut};
use std::{
    ffi::{CStr, CString},
    io,
    os::fd::{AsRawFd, RawFd},
    ptr,
};
use tokio::io::unix::AsyncFd;

/// Longest queue name Linux accepts, not counting the leading slash.
const NAME_MAX: usize = 255;

/// Owned message queue descriptor. On Linux an `mqd_t` is a pollable file
/// descriptor, which is what lets the reactor watch it.
struct MqDescriptor(libc::mqd_t);

impl MqDescriptor {
    fn open(name: &CStr, oflag: libc::c_int) -> io::Result<Self> {
        let mode: libc::mode_t = 0o600;
        // SAFETY: `name` is a valid NUL-terminated string; a null attribute
        // pointer selects the system default queue limits.
        let mqd = unsafe {
            libc::mq_open(
                name.as_ptr(),
                oflag,
                mode,
                ptr::null_mut::<libc::mq_attr>(),
            )
        };
        if mqd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(mqd))
    }

    fn msg_size(&self) -> io::Result<usize> {
        // SAFETY: mq_attr is plain old data; zeroed is a valid value.
        let mut attr: libc::mq_attr = unsafe { std::mem::zeroed() };
        // SAFETY: valid descriptor and a valid out pointer.
        if unsafe { libc::mq_getattr(self.0, &mut attr) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(attr.mq_msgsize as usize)
    }

    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: the buffer is valid for `buf.len()` bytes and mq_receive
        // writes at most that many.
        let n = unsafe {
            libc::mq_receive(
                self.0,
                buf.as_mut_ptr().cast::<libc::c_char>(),
                buf.len(),
                ptr::null_mut(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn send(&self, msg: &[u8]) -> io::Result<()> {
        // SAFETY: the message slice is valid for `msg.len()` bytes.
        let ret = unsafe {
            libc::mq_send(self.0, msg.as_ptr().cast::<libc::c_char>(), msg.len(), 0)
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        let mqd = self.0;
        std::mem::forget(self);
        // SAFETY: the descriptor is owned and closed exactly once.
        if unsafe { libc::mq_close(mqd) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for MqDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for MqDescriptor {
    fn drop(&mut self) {
        // SAFETY: the descriptor is owned; errors on drop have nowhere to go.
        unsafe {
            libc::mq_close(self.0);
        }
    }
}

fn queue_name(name: &str) -> Result<CString, ChannelError> {
    let valid = name.len() > 1
        && name.len() - 1 <= NAME_MAX
        && name.starts_with('/')
        && !name[1..].contains('/');
    if !valid {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| ChannelError::InvalidName(name.to_string()))
}

/// Receiving end of the event channel, owned by the supervisor.
pub struct EventChannel {
    name: String,
    fd: AsyncFd<MqDescriptor>,
    msg_size: usize,
}

impl EventChannel {
    /// Creates the queue. Fails with [`ChannelError::AlreadyExists`] if a
    /// queue of that name is already present, e.g. left behind by a crashed
    /// instance or owned by another supervisor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(name: &str) -> Result<Self, ChannelError> {
        let c_name = queue_name(name)?;
        // Queue descriptors are always close-on-exec on Linux.
        let oflag = libc::O_RDWR | libc::O_CREAT | libc::O_EXCL | libc::O_NONBLOCK;
        let desc = MqDescriptor::open(&c_name, oflag).map_err(|source| {
            if source.raw_os_error() == Some(libc::EEXIST) {
                ChannelError::AlreadyExists {
                    name: name.to_string(),
                }
            } else {
                ChannelError::Open {
                    name: name.to_string(),
                    source,
                }
            }
        })?;

        let msg_size = match desc.msg_size() {
            Ok(size) => size,
            Err(e) => {
                drop(desc);
                let _ = unlink(name);
                return Err(ChannelError::Attributes(e));
            }
        };
        let fd = match AsyncFd::new(desc) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = unlink(name);
                return Err(ChannelError::Register(e));
            }
        };

        tracing::debug!("Created event channel {} (msg size {})", name, msg_size);
        Ok(Self {
            name: name.to_string(),
            fd,
            msg_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until a message is available and returns exactly one of them.
    ///
    /// Cancel safe: dropping the future before it resolves loses no message.
    pub async fn recv(&self) -> Result<Bytes, ChannelError> {
        let mut buf = BytesMut::zeroed(self.msg_size);
        loop {
            let mut guard = self.fd.readable().await.map_err(ChannelError::Receive)?;
            match guard.try_io(|inner| inner.get_ref().receive(&mut buf)) {
                Ok(Ok(n)) => {
                    buf.truncate(n);
                    return Ok(buf.freeze());
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(ChannelError::Receive(e)),
                Err(_would_block) => continue,
            }
        }
    }

    /// Closes the descriptor and removes the queue from the system. The
    /// unlink is attempted even when closing fails.
    pub fn close(self) -> Result<(), ChannelError> {
        let desc = self.fd.into_inner();
        let closed = desc.close().map_err(ChannelError::Close);
        unlink(&self.name)?;
        closed?;
        tracing::debug!("Closed event channel {}", self.name);
        Ok(())
    }
}

/// Sending end, used by the handler invoked from udhcpc.
pub struct ChannelSender {
    fd: MqDescriptor,
}

impl ChannelSender {
    /// Opens an existing queue write-only. Sends block while the queue is full.
    pub fn open(name: &str) -> Result<Self, ChannelError> {
        let c_name = queue_name(name)?;
        let fd = MqDescriptor::open(&c_name, libc::O_WRONLY).map_err(|source| {
            ChannelError::Open {
                name: name.to_string(),
                source,
            }
        })?;
        Ok(Self { fd })
    }

    pub fn send(&self, msg: &[u8]) -> Result<(), ChannelError> {
        self.fd.send(msg).map_err(ChannelError::Send)
    }
}

/// Removes a queue by name. Open descriptors stay usable until closed.
pub fn unlink(name: &str) -> Result<(), ChannelError> {
    let c_name = queue_name(name)?;
    // SAFETY: `c_name` is a valid NUL-terminated string.
    if unsafe { libc::mq_unlink(c_name.as_ptr()) } < 0 {
        return Err(ChannelError::Unlink {
            name: name.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}
