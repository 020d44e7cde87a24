//! Idle Connection Pool Tests
//!
//! Covers:
//! - Keyed reuse (plain, proxied, TLS hostname identity)
//! - Keep-alive expiry and next-deadline scheduling
//! - Capacity eviction across keys
//! - Cleanup triggers firing on idle-time data, errors and end of stream
//! - Stop and the degraded state after it

use bytes::Bytes;
use keepalive::base::neterror::NetError;
use keepalive::base::timeline::{Deadline, ManualClock};
use keepalive::socket::config::PoolConfig;
use keepalive::socket::connection::HttpConnection;
use keepalive::socket::flow::{ConnectionFlow, EventFlow};
use keepalive::socket::key::{CacheKey, Endpoint};
use keepalive::socket::pool::ConnectionPool;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

type CloseLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
struct MockConnection {
    name: String,
    key: CacheKey,
    secure: bool,
    flow: EventFlow,
    closes: AtomicUsize,
    cause: Mutex<Option<NetError>>,
    log: Option<CloseLog>,
}

impl MockConnection {
    fn plain(name: &str, dest: &Endpoint) -> Arc<Self> {
        Self::build(name, false, Some(dest.clone()), None, None)
    }

    fn secure(name: &str, dest: &Endpoint) -> Arc<Self> {
        Self::build(name, true, Some(dest.clone()), None, None)
    }

    fn build(
        name: &str,
        secure: bool,
        dest: Option<Endpoint>,
        proxy: Option<Endpoint>,
        log: Option<CloseLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            key: CacheKey::for_route(secure, dest, proxy),
            secure,
            flow: EventFlow::new(),
            closes: AtomicUsize::new(0),
            cause: Mutex::new(None),
            log,
        })
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn close_cause(&self) -> Option<NetError> {
        self.cause.lock().unwrap().clone()
    }
}

impl HttpConnection for MockConnection {
    fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn flow(&self) -> &dyn ConnectionFlow {
        &self.flow
    }

    fn close(&self, cause: Option<NetError>) -> Result<(), NetError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if cause.is_some() {
            *self.cause.lock().unwrap() = cause;
        }
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.clone());
        }
        Ok(())
    }

    fn label(&self) -> String {
        format!("Mock({})", self.name)
    }
}

fn endpoint(host: &str, addr: &str) -> Endpoint {
    Endpoint::new(host, addr.parse::<SocketAddr>().unwrap())
}

fn pool(max: usize) -> ConnectionPool<MockConnection> {
    ConnectionPool::new(1, PoolConfig::new().max_pool_size(max))
}

const KEEP_ALIVE: Duration = Duration::from_secs(60);

#[test]
fn test_release_then_acquire_round_trip() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);

    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    assert_eq!(pool.idle_count(), 1);
    assert!(pool.contains(&conn));

    let got = pool.acquire(false, Some(&dest), None).expect("pooled connection");
    assert!(Arc::ptr_eq(&got, &conn));
    assert_eq!(pool.idle_count(), 0);
    assert!(!pool.contains(&conn));
    assert_eq!(conn.close_count(), 0);
}

#[test]
fn test_acquire_is_exclusive() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    pool.release(MockConnection::plain("a", &dest), Deadline::ORIGIN, KEEP_ALIVE);

    let barrier = Arc::new(Barrier::new(16));
    let hits = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let dest = dest.clone();
            let barrier = Arc::clone(&barrier);
            let hits = Arc::clone(&hits);
            thread::spawn(move || {
                barrier.wait();
                if pool.acquire(false, Some(&dest), None).is_some() {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn test_concurrent_release_acquire_never_duplicates() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let created = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let pool = pool.clone();
            let dest = dest.clone();
            let created = Arc::clone(&created);
            thread::spawn(move || {
                for i in 0..200 {
                    let conn = match pool.acquire(false, Some(&dest), None) {
                        Some(conn) => conn,
                        None => {
                            created.fetch_add(1, Ordering::SeqCst);
                            MockConnection::plain(&format!("{}-{}", t, i), &dest)
                        }
                    };
                    assert!(!pool.contains(&conn), "acquired connection still pooled");
                    pool.release(conn, Deadline::ORIGIN, KEEP_ALIVE);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut drained: Vec<Arc<MockConnection>> = Vec::new();
    while let Some(conn) = pool.acquire(false, Some(&dest), None) {
        assert!(!drained.iter().any(|c| Arc::ptr_eq(c, &conn)), "connection pooled twice");
        drained.push(conn);
    }
    assert_eq!(drained.len(), created.load(Ordering::SeqCst));
}

#[test]
fn test_miss_for_unknown_key() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    pool.release(MockConnection::plain("a", &dest), Deadline::ORIGIN, KEEP_ALIVE);

    let other = endpoint("example.com", "10.0.0.2:80");
    assert!(pool.acquire(false, Some(&other), None).is_none());
    assert!(pool.acquire(true, Some(&dest), None).is_none());
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_bucket_is_fifo() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let first = MockConnection::plain("first", &dest);
    let second = MockConnection::plain("second", &dest);
    pool.release(first.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    pool.release(second.clone(), Deadline::from_secs(1), KEEP_ALIVE);

    assert!(Arc::ptr_eq(&pool.acquire(false, Some(&dest), None).unwrap(), &first));
    assert!(Arc::ptr_eq(&pool.acquire(false, Some(&dest), None).unwrap(), &second));
}

#[test]
fn test_plain_proxy_connection_serves_any_destination() {
    let pool = pool(0);
    let proxy = endpoint("proxy.local", "192.168.0.1:3128");
    let a = endpoint("a.example", "10.0.0.1:80");
    let b = endpoint("b.example", "10.0.0.2:80");
    let conn = MockConnection::build("p", false, Some(a), Some(proxy.clone()), None);

    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    let got = pool.acquire(false, Some(&b), Some(&proxy)).expect("proxy connection");
    assert!(Arc::ptr_eq(&got, &conn));
}

#[test]
fn test_secure_proxy_connection_keeps_destination() {
    let pool = pool(0);
    let proxy = endpoint("proxy.local", "192.168.0.1:3128");
    let a = endpoint("a.example", "10.0.0.1:443");
    let b = endpoint("b.example", "10.0.0.2:443");
    let conn = MockConnection::build("t", true, Some(a.clone()), Some(proxy.clone()), None);

    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    assert!(pool.acquire(true, Some(&b), Some(&proxy)).is_none());
    assert!(pool.acquire(true, Some(&a), None).is_none());
    let got = pool.acquire(true, Some(&a), Some(&proxy)).expect("tunnel connection");
    assert!(Arc::ptr_eq(&got, &conn));
}

#[test]
fn test_secure_hostnames_at_one_address_are_distinct() {
    let pool = pool(0);
    let alpha = endpoint("alpha.example", "10.0.0.1:443");
    let beta = endpoint("beta.example", "10.0.0.1:443");
    let conn = MockConnection::secure("alpha", &alpha);

    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    assert!(pool.acquire(true, Some(&beta), None).is_none());
    assert!(pool.contains(&conn));

    let upper = endpoint("ALPHA.example", "10.0.0.1:443");
    let got = pool.acquire(true, Some(&upper), None).expect("same identity, other case");
    assert!(Arc::ptr_eq(&got, &conn));
    assert!(got.is_secure());
}

#[test]
fn test_sweep_purges_in_deadline_order() {
    let pool = pool(0);
    let log: CloseLog = Arc::default();
    let dest = endpoint("example.com", "10.0.0.1:80");
    let mk = |name: &str| MockConnection::build(name, false, Some(dest.clone()), None, Some(log.clone()));

    let d1 = mk("d1");
    let d2 = mk("d2");
    let d3 = mk("d3");
    // Inserted out of deadline order.
    pool.release(d2.clone(), Deadline::ORIGIN, Duration::from_secs(20));
    pool.release(d3.clone(), Deadline::ORIGIN, Duration::from_secs(30));
    pool.release(d1.clone(), Deadline::ORIGIN, Duration::from_secs(10));

    let next = pool.sweep(Deadline::from_millis(25_000));
    assert_eq!(next, Duration::from_secs(5));
    assert_eq!(*log.lock().unwrap(), vec!["d1".to_string(), "d2".to_string()]);
    assert!(!pool.contains(&d1));
    assert!(!pool.contains(&d2));
    assert!(pool.contains(&d3));
    assert_eq!(d3.close_count(), 0);

    let next = pool.sweep(Deadline::from_secs(30));
    assert_eq!(next, Duration::ZERO);
    assert_eq!(d3.close_count(), 1);
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn test_sweep_on_empty_pool() {
    let pool = pool(0);
    assert_eq!(pool.sweep(Deadline::from_secs(1_000)), Duration::ZERO);
    assert_eq!(pool.purge_expired(), Duration::ZERO);
}

#[test]
fn test_sweep_before_any_deadline_reports_delay() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);
    pool.release(conn.clone(), Deadline::from_millis(1_500), Duration::from_secs(10));

    // Deadline is truncated: 1s + 10s.
    assert_eq!(pool.deadline_of(&conn), Some(Deadline::from_secs(11)));
    assert_eq!(pool.sweep(Deadline::from_millis(2_000)), Duration::from_millis(9_000));
    assert!(pool.contains(&conn));
}

#[test]
fn test_purge_expired_uses_pool_clock() {
    let clock = Arc::new(ManualClock::new());
    let config = PoolConfig::new().keep_alive(Duration::from_secs(5));
    let pool = ConnectionPool::with_time_source(7, config, clock.clone());
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);

    pool.release_default(conn.clone());
    assert_eq!(pool.next_expiry_deadline(), Some(Deadline::from_secs(5)));

    clock.advance(Duration::from_secs(4));
    assert_eq!(pool.purge_expired(), Duration::from_secs(1));
    assert!(pool.contains(&conn));

    clock.advance(Duration::from_secs(1));
    assert_eq!(pool.purge_expired(), Duration::ZERO);
    assert!(!pool.contains(&conn));
    assert_eq!(conn.close_count(), 1);
}

#[test]
fn test_capacity_evicts_globally_oldest() {
    let pool = pool(3);
    let conns: Vec<_> = (0..4)
        .map(|i| {
            let dest = endpoint("example.com", &format!("10.0.0.{}:80", i + 1));
            (dest.clone(), MockConnection::plain(&i.to_string(), &dest))
        })
        .collect();

    for (i, (_, conn)) in conns.iter().enumerate() {
        pool.release(conn.clone(), Deadline::from_secs(i as u64), KEEP_ALIVE);
    }

    assert_eq!(pool.idle_count(), 3);
    let evicted: Vec<_> = conns.iter().filter(|(_, c)| c.close_count() == 1).collect();
    assert_eq!(evicted.len(), 1);
    assert!(Arc::ptr_eq(&evicted[0].1, &conns[0].1));
    assert!(pool.acquire(false, Some(&conns[0].0), None).is_none());
    assert!(pool.acquire(false, Some(&conns[3].0), None).is_some());
}

#[test]
fn test_capacity_two_same_destination() {
    let pool = pool(2);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let a = MockConnection::plain("A", &dest);
    let b = MockConnection::plain("B", &dest);
    let c = MockConnection::plain("C", &dest);

    pool.release(a.clone(), Deadline::from_secs(0), KEEP_ALIVE);
    pool.release(b.clone(), Deadline::from_secs(1), KEEP_ALIVE);
    pool.release(c.clone(), Deadline::from_secs(2), KEEP_ALIVE);

    assert_eq!(pool.idle_count(), 2);
    assert_eq!(a.close_count(), 1);
    assert!(!pool.contains(&a));
    assert!(pool.contains(&b));
    assert!(pool.contains(&c));
    assert_eq!(pool.next_expiry_deadline(), Some(Deadline::from_secs(61)));
}

#[test]
fn test_unbounded_pool_never_evicts() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conns: Vec<_> = (0..50).map(|i| MockConnection::plain(&i.to_string(), &dest)).collect();
    for conn in &conns {
        pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    }
    assert_eq!(pool.idle_count(), 50);
    assert!(conns.iter().all(|c| c.close_count() == 0));
}

#[test]
fn test_release_twice_keeps_single_copy() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);

    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    pool.release(conn.clone(), Deadline::from_secs(10), KEEP_ALIVE);

    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.deadline_of(&conn), Some(Deadline::from_secs(70)));
    assert!(pool.acquire(false, Some(&dest), None).is_some());
    assert!(pool.acquire(false, Some(&dest), None).is_none());
}

#[test]
fn test_unsolicited_data_evicts_idle_connection() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);
    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);

    conn.flow.push_data(vec![Bytes::from_static(b"x")]);

    assert!(pool.acquire(false, Some(&dest), None).is_none());
    assert!(!pool.contains(&conn));
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(conn.close_count(), 1);
    assert_eq!(conn.close_cause(), None);
}

#[test]
fn test_idle_error_and_eof_evict() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let reset = MockConnection::plain("reset", &dest);
    let eof = MockConnection::plain("eof", &dest);
    pool.release(reset.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    pool.release(eof.clone(), Deadline::ORIGIN, KEEP_ALIVE);

    reset.flow.push_error(NetError::ConnectionReset);
    eof.flow.push_complete();

    assert_eq!(pool.idle_count(), 0);
    assert_eq!(reset.close_count(), 1);
    assert_eq!(eof.close_count(), 1);
}

#[test]
fn test_trigger_fires_once() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);
    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);

    conn.flow.push_data(vec![Bytes::from_static(b"x")]);
    conn.flow.push_data(vec![Bytes::from_static(b"y")]);
    conn.flow.push_complete();
    assert_eq!(conn.close_count(), 1);
}

#[test]
fn test_data_after_acquire_closes_with_anomaly() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);
    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);

    // New owner has not taken the flow back yet; the trigger still listens.
    let got = pool.acquire(false, Some(&dest), None).unwrap();
    got.flow.push_data(vec![Bytes::from_static(b"HTTP/1.1 200 OK")]);

    assert_eq!(conn.close_count(), 1);
    assert_eq!(
        conn.close_cause(),
        Some(NetError::unexpected_cleanup(Some(NetError::DataReceivedUnexpectedly)))
    );
}

#[test]
fn test_abandoned_trigger_never_fires() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);
    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);

    let got = pool.acquire(false, Some(&dest), None).unwrap();
    got.flow.detach();
    got.flow.push_data(vec![Bytes::from_static(b"response")]);

    assert_eq!(conn.close_count(), 0);
    assert_eq!(conn.flow.pending_items(), 1);
}

#[test]
fn test_connection_dead_before_release_is_not_pooled() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);
    conn.flow.push_complete();

    pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);

    assert!(!pool.contains(&conn));
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(conn.close_count(), 1);
}

#[test]
fn test_cleanup_of_absent_connection_without_data() {
    let pool = pool(0);
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("a", &dest);

    pool.cleanup(&conn, 0, Some(NetError::ConnectionReset));
    assert_eq!(conn.close_count(), 1);
    assert_eq!(conn.close_cause(), None);
}

#[test]
fn test_stop_closes_idle_and_degrades() {
    let pool = pool(0);
    let plain_dest = endpoint("example.com", "10.0.0.1:80");
    let tls_dest = endpoint("example.com", "10.0.0.1:443");
    let plain = MockConnection::plain("plain", &plain_dest);
    let tls = MockConnection::secure("tls", &tls_dest);
    pool.release(plain.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    pool.release(tls.clone(), Deadline::ORIGIN, KEEP_ALIVE);

    pool.stop();
    assert!(pool.is_stopped());
    assert_eq!(plain.close_count(), 1);
    assert_eq!(tls.close_count(), 1);
    assert_eq!(pool.idle_count(), 0);

    for _ in 0..2 {
        let late = MockConnection::plain("late", &plain_dest);
        pool.release(late.clone(), Deadline::ORIGIN, KEEP_ALIVE);
        assert!(!pool.contains(&late));
        assert_eq!(late.close_count(), 1);
        assert!(pool.acquire(false, Some(&plain_dest), None).is_none());
    }

    // A second stop is harmless.
    pool.stop();
    assert_eq!(plain.close_count(), 1);
    assert_eq!(pool.sweep(Deadline::from_secs(1_000)), Duration::ZERO);
}

#[test]
fn test_label_names_client() {
    let pool: ConnectionPool<MockConnection> = ConnectionPool::new(42, PoolConfig::default());
    assert_eq!(pool.label(), "ConnectionPool(42)");
}

#[test]
fn test_trigger_closes_connection_after_pool_dropped() {
    let dest = endpoint("example.com", "10.0.0.1:80");
    let conn = MockConnection::plain("orphan", &dest);
    {
        let pool = pool(0);
        pool.release(conn.clone(), Deadline::ORIGIN, KEEP_ALIVE);
    }
    // Dropping the pool released its reference, the trigger is still subscribed.
    assert!(conn.flow.has_listener());

    conn.flow.push_error(NetError::ConnectionReset);
    assert_eq!(conn.close_count(), 1);
    assert_eq!(conn.close_cause(), Some(NetError::ConnectionReset));
}
