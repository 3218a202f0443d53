//! Port verification stage

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::StageError;

/// Checks whether something accepts connections on a port
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_listening(&self, port: u16) -> bool;
}

/// TCP connect probe
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            connect_timeout,
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new("127.0.0.1", Duration::from_millis(500))
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_listening(&self, port: u16) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), port));
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Port {} not accepting connections: {}", port, e);
                false
            }
            Err(_) => {
                debug!("Connect to port {} timed out", port);
                false
            }
        }
    }
}

/// Polling budget for port verification
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Maximum number of probes
    pub attempts: u32,

    /// Fixed delay between probes
    pub interval: Duration,

    /// Wait before the first probe
    pub initial_delay: Duration,

    /// Overall budget measured from the first probe
    pub deadline: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
            initial_delay: Duration::from_secs(2),
            deadline: Duration::from_secs(30),
        }
    }
}

/// Poll `port` until it accepts a connection.
///
/// Returns the 1-based attempt that succeeded. Gives up after
/// `options.attempts` probes or once the next probe would start past the
/// deadline, whichever comes first.
pub async fn wait_for_port<P, S, F>(
    probe: &P,
    port: u16,
    options: &VerifyOptions,
    sleep_fn: S,
) -> Result<u32, StageError>
where
    P: PortProbe + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    if !options.initial_delay.is_zero() {
        sleep_fn(options.initial_delay).await;
    }

    let started = Instant::now();
    let mut attempts = 0;

    while attempts < options.attempts {
        attempts += 1;
        if probe.is_listening(port).await {
            info!("Port {} is listening (attempt {})", port, attempts);
            return Ok(attempts);
        }

        if attempts == options.attempts {
            break;
        }
        if started.elapsed() + options.interval > options.deadline {
            warn!(
                "Verify deadline of {:?} reached for port {}",
                options.deadline, port
            );
            break;
        }
        sleep_fn(options.interval).await;
    }

    Err(StageError::VerifyTimeoutError { port, attempts })
}

/// Poll `port` until nothing accepts connections on it.
///
/// Uses the attempt budget and interval of `options` without the initial
/// delay. Returns false if the port is still taken after the last probe.
pub async fn wait_for_port_release<P, S, F>(
    probe: &P,
    port: u16,
    options: &VerifyOptions,
    sleep_fn: S,
) -> bool
where
    P: PortProbe + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    for attempt in 1..=options.attempts.max(1) {
        if !probe.is_listening(port).await {
            return true;
        }
        debug!("Port {} still in use (attempt {})", port, attempt);
        if attempt < options.attempts {
            sleep_fn(options.interval).await;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Starts listening on the k-th probe
    struct ListensAfter {
        k: u32,
        calls: AtomicU32,
    }

    impl ListensAfter {
        fn new(k: u32) -> Self {
            Self {
                k,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PortProbe for ListensAfter {
        async fn is_listening(&self, _port: u16) -> bool {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            call >= self.k
        }
    }

    fn options(attempts: u32) -> VerifyOptions {
        VerifyOptions {
            attempts,
            interval: Duration::from_millis(10),
            initial_delay: Duration::ZERO,
            deadline: Duration::from_secs(60),
        }
    }

    async fn no_sleep(_: Duration) {}

    #[tokio::test]
    async fn test_succeeds_on_kth_poll() {
        let probe = ListensAfter::new(3);
        let attempt = wait_for_port(&probe, 8000, &options(5), no_sleep).await.unwrap();
        assert_eq!(attempt, 3);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_fails_after_exactly_n_attempts() {
        let probe = ListensAfter::new(u32::MAX);
        let err = wait_for_port(&probe, 8000, &options(5), no_sleep)
            .await
            .unwrap_err();
        assert_eq!(err, StageError::VerifyTimeoutError { port: 8000, attempts: 5 });
        assert_eq!(probe.calls(), 5);
    }

    #[tokio::test]
    async fn test_sleeps_between_polls_only() {
        let probe = ListensAfter::new(u32::MAX);
        let sleeps = AtomicU32::new(0);
        let opts = VerifyOptions {
            initial_delay: Duration::from_millis(1),
            ..options(4)
        };
        let _ = wait_for_port(&probe, 8000, &opts, |_| {
            sleeps.fetch_add(1, Ordering::SeqCst);
            async {}
        })
        .await;
        // initial delay plus three gaps between four probes
        assert_eq!(sleeps.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_deadline_stops_polling_early() {
        let probe = ListensAfter::new(u32::MAX);
        let opts = VerifyOptions {
            attempts: 1000,
            interval: Duration::from_millis(20),
            initial_delay: Duration::ZERO,
            deadline: Duration::from_millis(100),
        };
        let err = wait_for_port(&probe, 8000, &opts, tokio::time::sleep)
            .await
            .unwrap_err();
        match err {
            StageError::VerifyTimeoutError { attempts, .. } => {
                assert!(attempts < 1000);
                assert_eq!(attempts, probe.calls());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_tcp_probe_against_real_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::default();
        assert!(probe.is_listening(port).await);

        drop(listener);
        assert!(!probe.is_listening(port).await);
    }

    #[tokio::test]
    async fn test_port_release() {
        // listening until the 3rd probe means free from then on
        struct FreedAfter(AtomicU32);

        #[async_trait]
        impl PortProbe for FreedAfter {
            async fn is_listening(&self, _port: u16) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst) + 1 < 3
            }
        }

        let probe = FreedAfter(AtomicU32::new(0));
        assert!(wait_for_port_release(&probe, 8000, &options(5), no_sleep).await);
        assert_eq!(probe.0.load(Ordering::SeqCst), 3);

        let taken = ListensAfter::new(1);
        assert!(!wait_for_port_release(&taken, 8000, &options(4), no_sleep).await);
        assert_eq!(taken.calls(), 4);
    }
}
