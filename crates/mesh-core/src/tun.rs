//! Virtual interface abstraction. The core only needs non-blocking
//! frame-at-a-time read/write; the concrete implementation (a `/dev/net/tun`
//! handle wrapped in a `tokio::io::unix::AsyncFd`, on Linux) lives in the
//! daemon binary, not here, so the core stays portable and testable without
//! a real kernel interface.

use std::io;

use async_trait::async_trait;

use crate::addr::TunnelKind;

/// A TUN (L3) or TAP (L2) virtual network interface.
#[async_trait(?Send)]
pub trait TunDevice {
    fn kind(&self) -> TunnelKind;

    /// Resolves once the device is readable.
    async fn readable(&self) -> io::Result<()>;

    /// Resolves once the device is writable (a previously blocked write can
    /// now be retried).
    async fn writable(&self) -> io::Result<()>;

    /// Reads one frame, non-blocking. `Ok(None)` means "would block".
    async fn read_frame(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Writes one frame, non-blocking. `Ok(false)` means "would block" and
    /// the caller should retry later rather than drop the frame.
    async fn write_frame(&self, frame: &[u8]) -> io::Result<bool>;
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// An in-memory TUN device for event-loop tests: reads come from a
    /// preloaded queue, writes are captured for inspection.
    #[derive(Default)]
    pub struct MockTun {
        pub kind: Option<TunnelKind>,
        pub inbound: RefCell<VecDeque<Vec<u8>>>,
        pub outbound: RefCell<Vec<Vec<u8>>>,
    }

    impl MockTun {
        pub fn new(kind: TunnelKind) -> Self {
            Self {
                kind: Some(kind),
                inbound: RefCell::new(VecDeque::new()),
                outbound: RefCell::new(Vec::new()),
            }
        }

        pub fn push_inbound(&self, frame: Vec<u8>) {
            self.inbound.borrow_mut().push_back(frame);
        }
    }

    #[async_trait(?Send)]
    impl TunDevice for MockTun {
        fn kind(&self) -> TunnelKind {
            self.kind.unwrap_or(TunnelKind::Tun)
        }

        async fn readable(&self) -> io::Result<()> {
            Ok(())
        }

        async fn writable(&self) -> io::Result<()> {
            Ok(())
        }

        async fn read_frame(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
            let Some(frame) = self.inbound.borrow_mut().pop_front() else {
                return Ok(None);
            };
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            Ok(Some(n))
        }

        async fn write_frame(&self, frame: &[u8]) -> io::Result<bool> {
            self.outbound.borrow_mut().push(frame.to_vec());
            Ok(true)
        }
    }

    #[tokio::test]
    async fn mock_tun_roundtrips_a_frame() {
        let tun = MockTun::new(TunnelKind::Tun);
        tun.push_inbound(vec![1, 2, 3]);
        let mut buf = [0u8; 16];
        let n = tun.read_frame(&mut buf).await.unwrap().unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        assert!(tun.read_frame(&mut buf).await.unwrap().is_none());

        tun.write_frame(&[4, 5]).await.unwrap();
        assert_eq!(tun.outbound.borrow().as_slice(), &[vec![4, 5]]);
    }
}
