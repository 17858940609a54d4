//! A Linux `/dev/net/tun` handle configured via `TUNSETIFF`, wrapped in a
//! non-blocking [`AsyncFd`] so the event loop awaits readiness on it exactly
//! like it does the wire socket. Raw `libc` + `unsafe` ioctl calls, matching
//! how interface configuration is handled elsewhere in this codebase, rather
//! than pulling in a third-party TUN crate.

use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use async_trait::async_trait;
use tokio::io::unix::AsyncFd;

use mesh_core::{TunDevice, TunnelKind};

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFNAMSIZ: usize = 16;

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

struct RawTunFd(RawFd);

impl AsRawFd for RawTunFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for RawTunFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn raw_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn raw_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

pub struct LinuxTunDevice {
    kind: TunnelKind,
    inner: AsyncFd<RawTunFd>,
}

impl LinuxTunDevice {
    /// Opens `/dev/net/tun` and binds it to the named interface, creating it
    /// if it does not already exist (requires `CAP_NET_ADMIN`).
    pub fn open(name: &str, kind: TunnelKind) -> io::Result<Self> {
        let path = CString::new("/dev/net/tun").expect("no interior nul");
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut req: IfReq = unsafe { std::mem::zeroed() };
        let name_bytes = name.as_bytes();
        let len = name_bytes.len().min(IFNAMSIZ - 1);
        for (dst, &src) in req.ifr_name[..len].iter_mut().zip(&name_bytes[..len]) {
            *dst = src as libc::c_char;
        }
        req.ifr_flags = match kind {
            TunnelKind::Tun => IFF_TUN | IFF_NO_PI,
            TunnelKind::Tap => IFF_TAP | IFF_NO_PI,
        };

        let res = unsafe { libc::ioctl(fd, TUNSETIFF, &req as *const IfReq) };
        if res < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }

        Ok(Self {
            kind,
            inner: AsyncFd::new(RawTunFd(fd))?,
        })
    }
}

#[async_trait(?Send)]
impl TunDevice for LinuxTunDevice {
    fn kind(&self) -> TunnelKind {
        self.kind
    }

    async fn readable(&self) -> io::Result<()> {
        self.inner.readable().await?;
        Ok(())
    }

    async fn writable(&self) -> io::Result<()> {
        self.inner.writable().await?;
        Ok(())
    }

    async fn read_frame(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let mut guard = self.inner.readable().await?;
        match guard.try_io(|inner| raw_read(inner.as_raw_fd(), buf)) {
            Ok(result) => result.map(Some),
            Err(_would_block) => Ok(None),
        }
    }

    async fn write_frame(&self, frame: &[u8]) -> io::Result<bool> {
        let mut guard = self.inner.writable().await?;
        match guard.try_io(|inner| raw_write(inner.as_raw_fd(), frame)) {
            Ok(Ok(_n)) => Ok(true),
            Ok(Err(err)) => Err(err),
            Err(_would_block) => Ok(false),
        }
    }
}
