//! 데이터 포트 레지스트리
//!
//! 세션별 데이터 포트를 고정 범위에서 무작위로 할당.
//! 사용 중 포트는 단일 뮤텍스로 관리하며 바인드 성공까지 확인 후 넘김.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::{Error, Result};

/// 포트 바인드 최대 시도 횟수
const MAX_BIND_TRIES: usize = 16;

/// 데이터 포트 레지스트리
#[derive(Debug)]
pub struct PortRegistry {
    range: RangeInclusive<u16>,
    in_use: Mutex<HashSet<u16>>,
}

/// 할당된 포트 (drop 시 반환)
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    registry: Arc<PortRegistry>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.registry.in_use.lock().remove(&self.port);
    }
}

impl PortRegistry {
    pub fn new(range: RangeInclusive<u16>) -> Arc<Self> {
        Arc::new(Self {
            range,
            in_use: Mutex::new(HashSet::new()),
        })
    }

    /// 범위 내 전체 포트 수
    pub fn capacity(&self) -> usize {
        if self.range.is_empty() {
            return 0;
        }
        (*self.range.end() - *self.range.start()) as usize + 1
    }

    /// 사용 중 포트 수
    pub fn in_use(&self) -> usize {
        self.in_use.lock().len()
    }

    /// 빈 포트 하나를 무작위로 할당
    pub fn lease(self: &Arc<Self>) -> Result<PortLease> {
        let mut in_use = self.in_use.lock();

        let free = self.capacity() - in_use.len();
        if free == 0 {
            return Err(Error::PortPoolExhausted {
                start: *self.range.start(),
                end: *self.range.end(),
            });
        }

        let pick = rand::thread_rng().gen_range(0..free);
        let port = self
            .range
            .clone()
            .filter(|p| !in_use.contains(p))
            .nth(pick)
            .ok_or(Error::PortPoolExhausted {
                start: *self.range.start(),
                end: *self.range.end(),
            })?;
        in_use.insert(port);

        Ok(PortLease {
            port,
            registry: Arc::clone(self),
        })
    }

    /// 포트 할당 후 소켓 바인드
    ///
    /// 다른 프로세스가 점유한 포트는 건너뛰고 다시 뽑음.
    /// 실패한 포트는 이번 호출이 끝날 때까지 잡아 두어 재추첨되지 않음.
    pub async fn bind(self: &Arc<Self>, ip: IpAddr) -> Result<(PortLease, UdpSocket)> {
        let mut rejected = Vec::new();
        let mut last_err = None;

        for _ in 0..MAX_BIND_TRIES {
            let lease = match self.lease() {
                Ok(lease) => lease,
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            };

            match UdpSocket::bind(SocketAddr::new(ip, lease.port())).await {
                Ok(socket) => return Ok((lease, socket)),
                Err(e) => {
                    debug!("데이터 포트 {} 바인드 실패: {}", lease.port(), e);
                    last_err = Some(Error::Io(e));
                    rejected.push(lease);
                }
            }
        }

        Err(last_err.unwrap_or(Error::PortPoolExhausted {
            start: *self.range.start(),
            end: *self.range.end(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leases_are_unique_and_released() {
        let registry = PortRegistry::new(40000..=40009);
        assert_eq!(registry.capacity(), 10);

        let leases: Vec<PortLease> = (0..10).map(|_| registry.lease().unwrap()).collect();
        let ports: HashSet<u16> = leases.iter().map(|l| l.port()).collect();
        assert_eq!(ports.len(), 10);
        assert!(ports.iter().all(|p| (40000..=40009).contains(p)));
        assert_eq!(registry.in_use(), 10);

        assert!(matches!(
            registry.lease(),
            Err(Error::PortPoolExhausted { start: 40000, end: 40009 })
        ));

        drop(leases);
        assert_eq!(registry.in_use(), 0);
        assert!(registry.lease().is_ok());
    }

    #[test]
    fn test_concurrent_leases_never_collide() {
        let registry = PortRegistry::new(41000..=41199);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..50).map(|_| registry.lease().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let leases: Vec<PortLease> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let ports: HashSet<u16> = leases.iter().map(|l| l.port()).collect();
        assert_eq!(ports.len(), 200);
    }

    #[tokio::test]
    async fn test_bind_skips_occupied_port() {
        let occupied = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let registry = PortRegistry::new(port..=port);
        let result = registry.bind("127.0.0.1".parse().unwrap()).await;
        assert!(result.is_err());
        assert_eq!(registry.in_use(), 0);

        drop(occupied);
        let (lease, socket) = registry.bind("127.0.0.1".parse().unwrap()).await.unwrap();
        assert_eq!(lease.port(), port);
        assert_eq!(socket.local_addr().unwrap().port(), port);
    }
}
