//! UDP 입출력 보조 함수
//!
//! 수신 루프는 예외(타임아웃) 흐름 대신 "마감 시각까지 읽기"로 구성한다.
//! 마감이 지나면 `Ok(None)`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;

/// 마감 시각까지 데이터그램 하나 수신
pub async fn recv_until(
    socket: &UdpSocket,
    buf: &mut [u8],
    deadline: Instant,
) -> std::io::Result<Option<(usize, SocketAddr)>> {
    match tokio::time::timeout_at(deadline, socket.recv_from(buf)).await {
        Ok(Ok(received)) => Ok(Some(received)),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}

/// 이미 큐에 쌓인 데이터그램을 기다리지 않고 모두 버림, 버린 수 반환
///
/// 먼저 한 번 양보해서 런타임이 소켓 준비 상태를 갱신하게 한다.
pub async fn drain(socket: &UdpSocket, buf: &mut [u8]) -> usize {
    tokio::task::yield_now().await;

    let mut drained = 0;
    loop {
        match socket.try_recv_from(buf) {
            Ok(_) => drained += 1,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if is_transient(&e) => continue,
            Err(_) => break,
        }
    }
    drained
}

/// 전송 간격 대기 (0이면 양보만)
pub async fn pace(interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}

/// 연결 거부(ICMP port unreachable) 계열 에러 여부
///
/// 일부 플랫폼은 상대 포트가 닫혀 있으면 다음 recv 에서 이 에러를 돌려준다.
/// 수신 루프를 끝낼 이유는 아니다.
pub fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_until_returns_none_on_deadline() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 64];
        let deadline = Instant::now() + Duration::from_millis(30);
        let result = recv_until(&socket, &mut buf, deadline).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_recv_until_receives() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        b.send_to(b"hello", a.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 64];
        let deadline = Instant::now() + Duration::from_secs(2);
        let (len, from) = recv_until(&a, &mut buf, deadline).await.unwrap().unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, b.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_drain_discards_queued_datagrams() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for msg in [&b"one"[..], b"two", b"three"] {
            b.send_to(msg, a.local_addr().unwrap()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut buf = [0u8; 64];
        assert_eq!(drain(&a, &mut buf).await, 3);
        assert_eq!(drain(&a, &mut buf).await, 0);

        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(recv_until(&a, &mut buf, deadline).await.unwrap().is_none());
    }
}
