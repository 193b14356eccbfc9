use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use chiplink_transport::local_ipv4;
use tracing::{debug, info, trace};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};

/// One reachability check.
pub trait Prober: Send + Sync {
    fn probe(&self, addr: SocketAddr, timeout: Duration) -> bool;
}

/// Probes with a real TCP connect.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn probe(&self, addr: SocketAddr, timeout: Duration) -> bool {
        chiplink_transport::probe(addr, timeout)
    }
}

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Address the /24 was derived from.
    pub local: Ipv4Addr,
    pub port: u16,
    /// First host that accepted a connection, if any.
    pub found: Option<Ipv4Addr>,
    /// Hosts queued for probing before the scan stopped launching.
    pub launched: usize,
    pub elapsed: Duration,
}

/// Hosts .1 through .254 of `local`'s /24, minus `local` itself.
pub fn candidates(local: Ipv4Addr) -> impl Iterator<Item = Ipv4Addr> {
    let [a, b, c, _] = local.octets();
    (1..=254u8)
        .map(move |d| Ipv4Addr::new(a, b, c, d))
        .filter(move |ip| *ip != local)
}

/// State shared between the scan and its workers.
struct ScanShared {
    /// Write-once result slot: the first `set` wins, later ones are rejected.
    found: OnceLock<Ipv4Addr>,
    /// Hosts queued but not yet finished.
    outstanding: AtomicUsize,
    /// Set once the scan has returned; queued hosts and retries are skipped.
    closed: AtomicBool,
}

impl ScanShared {
    /// True while a probe may still change the outcome.
    fn wanted(&self) -> bool {
        self.found.get().is_none() && !self.closed.load(Ordering::SeqCst)
    }
}

/// Discovers a controller on the local subnet.
pub struct AddressScanner {
    config: ScanConfig,
    prober: Arc<dyn Prober>,
}

impl AddressScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self::with_prober(config, Arc::new(TcpProber))
    }

    pub fn with_prober(config: ScanConfig, prober: Arc<dyn Prober>) -> Self {
        Self { config, prober }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan the /24 of the outward-facing local address.
    pub fn scan(&self, port: u16) -> Result<ScanReport> {
        let local = local_ipv4()?;
        info!(%local, port, "scanning local subnet");
        self.scan_subnet(local, port)
    }

    /// Scan the /24 around `local`.
    ///
    /// Returns as soon as a host answers, when every probe has finished, or
    /// when the overall timeout runs out. Probes still in flight at that
    /// point are abandoned and retire on their own timeouts.
    pub fn scan_subnet(&self, local: Ipv4Addr, port: u16) -> Result<ScanReport> {
        let start = Instant::now();
        let deadline = start + self.config.overall_timeout;
        let shared = Arc::new(ScanShared {
            found: OnceLock::new(),
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::channel::<Ipv4Addr>();
        let rx = Arc::new(Mutex::new(rx));
        for id in 0..self.config.workers.clamp(1, 254) {
            let worker = ProbeWorker {
                port,
                timeouts: self.config.probe_timeouts.clone(),
                prober: Arc::clone(&self.prober),
                shared: Arc::clone(&shared),
                queue: Arc::clone(&rx),
            };
            std::thread::Builder::new()
                .name(format!("chiplink-probe-{id}"))
                .spawn(move || worker.run())
                .map_err(ScanError::Worker)?;
        }

        let batch_size = self.config.batch_size.max(1);
        let mut launched = 0usize;
        for ip in candidates(local) {
            if shared.found.get().is_some() || Instant::now() >= deadline {
                break;
            }
            shared.outstanding.fetch_add(1, Ordering::SeqCst);
            if tx.send(ip).is_err() {
                shared.outstanding.fetch_sub(1, Ordering::SeqCst);
                break;
            }
            launched += 1;
            if launched % batch_size == 0 {
                std::thread::sleep(self.config.batch_pause);
            }
        }
        // Workers exit once the queue drains.
        drop(tx);
        debug!(launched, "probes queued");

        let found = loop {
            if let Some(ip) = shared.found.get() {
                break Some(*ip);
            }
            if shared.outstanding.load(Ordering::SeqCst) == 0 {
                break None;
            }
            let now = Instant::now();
            if now >= deadline {
                break None;
            }
            std::thread::sleep(self.config.poll_interval.min(deadline - now));
        };
        // Probes already in flight finish on their own timeout; nothing new starts.
        shared.closed.store(true, Ordering::SeqCst);

        let report = ScanReport {
            local,
            port,
            found,
            launched,
            elapsed: start.elapsed(),
        };
        match report.found {
            Some(ip) => info!(%ip, port, elapsed_ms = report.elapsed.as_millis() as u64, "controller found"),
            None => info!(port, launched, "no controller found"),
        }
        Ok(report)
    }
}

struct ProbeWorker {
    port: u16,
    timeouts: Vec<Duration>,
    prober: Arc<dyn Prober>,
    shared: Arc<ScanShared>,
    queue: Arc<Mutex<Receiver<Ipv4Addr>>>,
}

impl ProbeWorker {
    fn run(self) {
        loop {
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            let Ok(ip) = next else {
                return;
            };
            if self.shared.wanted() {
                self.probe_host(ip);
            }
            self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn probe_host(&self, ip: Ipv4Addr) {
        let addr = SocketAddr::V4(SocketAddrV4::new(ip, self.port));
        for timeout in &self.timeouts {
            if !self.shared.wanted() {
                return;
            }
            if self.prober.probe(addr, *timeout) {
                match self.shared.found.set(ip) {
                    Ok(()) => debug!(%ip, "probe won"),
                    Err(_) => trace!(%ip, "probe answered after another host won"),
                }
                return;
            }
        }
    }
}
