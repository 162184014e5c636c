//! Finds the companion app on the local network over multicast DNS.
//!
//! A phone tethered over USB announces only link-local addresses, so a
//! candidate whose every address is link-local ends the browse at once.
//! Any other first sighting starts a short grace period in case the
//! tethered phone is still coming up.

use crate::errors::AutomationError;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

pub const SERVICE_TYPE: &str = "_minime._tcp.local.";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);
pub const GRACE_PERIOD: Duration = Duration::from_secs(3);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Matched case-insensitively against `device_name` from `/api/status`.
pub const DEVICE_KEYWORDS: [&str; 2] = ["iphone", "ipad"];

/// One announced companion instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionService {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub all_addresses: Vec<String>,
}

impl CompanionService {
    /// `None` when the announcement resolved to no address.
    pub fn new(
        name: impl Into<String>,
        port: u16,
        addresses: Vec<String>,
        properties: BTreeMap<String, String>,
    ) -> Option<Self> {
        let host = pick_best_address(&addresses)?.to_string();
        Some(Self {
            host,
            port,
            name: name.into(),
            properties,
            all_addresses: addresses,
        })
    }

    pub fn base_url(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// Every address is link-local: the phone is on the other end of a cable.
    pub fn is_tethered(&self) -> bool {
        is_link_local_only(&self.all_addresses)
    }
}

pub fn is_link_local(address: &str) -> bool {
    address.starts_with("169.254.") || address.to_ascii_lowercase().starts_with("fe80::")
}

pub fn is_link_local_only(addresses: &[String]) -> bool {
    !addresses.is_empty() && addresses.iter().all(|a| is_link_local(a))
}

/// First IPv4 link-local address, else first non-loopback IPv4, else the first address.
pub fn pick_best_address(addresses: &[String]) -> Option<&str> {
    addresses
        .iter()
        .find(|a| a.starts_with("169.254."))
        .or_else(|| {
            addresses
                .iter()
                .find(|a| a.contains('.') && !a.starts_with("127."))
        })
        .or_else(|| addresses.first())
        .map(String::as_str)
}

/// Candidates seen so far, shared between the browse thread and `find`.
#[derive(Debug, Default)]
pub struct Sightings {
    inner: Mutex<SightingState>,
}

#[derive(Debug, Default)]
struct SightingState {
    candidates: Vec<CompanionService>,
    tethered: bool,
    first_untethered_at: Option<Instant>,
}

impl Sightings {
    pub fn record(&self, service: CompanionService) {
        let mut state = self.lock();
        if service.is_tethered() {
            state.tethered = true;
        } else if state.first_untethered_at.is_none() {
            state.first_untethered_at = Some(Instant::now());
        }
        debug!(name = %service.name, host = %service.host, port = service.port, "companion announced");
        state.candidates.push(service);
    }

    pub fn tethered_found(&self) -> bool {
        self.lock().tethered
    }

    pub fn first_untethered_at(&self) -> Option<Instant> {
        self.lock().first_untethered_at
    }

    pub fn snapshot(&self) -> Vec<CompanionService> {
        self.lock().candidates.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SightingState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A multicast listener that reports resolved services into [`Sightings`].
pub trait ServiceBrowser {
    fn start(&mut self, service_type: &str, sightings: Arc<Sightings>) -> Result<(), AutomationError>;

    /// Releases the listener. Must be safe to call more than once.
    fn stop(&mut self);
}

/// [`ServiceBrowser`] backed by the `mdns-sd` daemon.
#[derive(Default)]
pub struct MdnsBrowser {
    daemon: Option<ServiceDaemon>,
    service_type: String,
    stop_flag: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl MdnsBrowser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn start(&mut self, service_type: &str, sightings: Arc<Sightings>) -> Result<(), AutomationError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| AutomationError::Discovery(format!("could not start mDNS daemon: {e}")))?;
        let receiver = match daemon.browse(service_type) {
            Ok(receiver) => receiver,
            Err(e) => {
                let _ = daemon.shutdown();
                return Err(AutomationError::Discovery(format!(
                    "could not browse {service_type}: {e}"
                )));
            }
        };

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = Arc::clone(&self.stop_flag);
        self.listener = Some(thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match receiver.recv_timeout(POLL_INTERVAL) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        if let Some(service) = service_from_info(&info) {
                            sightings.record(service);
                        }
                    }
                    Ok(other) => trace!(event = ?other, "ignored mDNS event"),
                    Err(_) if receiver.is_disconnected() => break,
                    Err(_) => {}
                }
            }
        }));
        self.daemon = Some(daemon);
        self.service_type = service_type.to_string();
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(daemon) = self.daemon.take() {
            if let Err(e) = daemon.stop_browse(&self.service_type) {
                debug!(error = %e, "stop_browse failed");
            }
            if let Err(e) = daemon.shutdown() {
                debug!(error = %e, "mDNS daemon shutdown failed");
            }
        }
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                warn!("mDNS listener thread panicked");
            }
        }
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        self.stop();
    }
}

fn service_from_info(info: &ServiceInfo) -> Option<CompanionService> {
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort();
    let properties = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), decode_property(p.val())))
        .collect();
    CompanionService::new(
        info.get_fullname(),
        info.get_port(),
        addresses.iter().map(IpAddr::to_string).collect(),
        properties,
    )
}

/// TXT values are text in practice; anything else keeps a raw byte rendering.
fn decode_property(value: Option<&[u8]>) -> String {
    match value {
        None => String::new(),
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => format!("{bytes:?}"),
        },
    }
}

/// Stops the browser when dropped, whatever path `find` leaves by.
struct BrowseGuard<'a, B: ServiceBrowser + ?Sized> {
    browser: &'a mut B,
}

impl<B: ServiceBrowser + ?Sized> Drop for BrowseGuard<'_, B> {
    fn drop(&mut self) {
        self.browser.stop();
    }
}

type Verifier = Box<dyn Fn(&CompanionService) -> bool + Send + Sync>;

/// Browses for the companion and picks the instance running on the phone.
pub struct CompanionDiscovery {
    service_type: String,
    timeout: Duration,
    grace_period: Duration,
    poll_interval: Duration,
    verifier: Verifier,
}

impl Default for CompanionDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanionDiscovery {
    pub fn new() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            grace_period: GRACE_PERIOD,
            poll_interval: POLL_INTERVAL,
            verifier: Box::new(probe_device),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    /// Replaces the `/api/status` probe used to confirm a candidate is a phone.
    pub fn verifier(mut self, verifier: impl Fn(&CompanionService) -> bool + Send + Sync + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    /// Browses with the system mDNS daemon. `Ok(None)` when nothing answered.
    pub fn find(&self) -> Result<Option<CompanionService>, AutomationError> {
        let mut browser = MdnsBrowser::new();
        self.find_with(&mut browser)
    }

    #[instrument(skip(self, browser), fields(service_type = %self.service_type, timeout = ?self.timeout))]
    pub fn find_with<B: ServiceBrowser + ?Sized>(
        &self,
        browser: &mut B,
    ) -> Result<Option<CompanionService>, AutomationError> {
        let sightings = Arc::new(Sightings::default());
        let guard = BrowseGuard { browser };
        guard
            .browser
            .start(&self.service_type, Arc::clone(&sightings))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!("discovery window elapsed");
                break;
            }
            if sightings.tethered_found() {
                debug!("tethered companion found");
                break;
            }
            if let Some(first) = sightings.first_untethered_at() {
                if now.duration_since(first) >= self.grace_period {
                    debug!("grace period elapsed without a tethered companion");
                    break;
                }
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
        drop(guard);

        let candidates = sightings.snapshot();
        let chosen = select_candidate(&candidates, |svc| (self.verifier)(svc));
        match &chosen {
            Some(svc) => info!(host = %svc.host, port = svc.port, name = %svc.name, "companion selected"),
            None => info!("no companion announced"),
        }
        Ok(chosen)
    }
}

/// Tethered first, then verified, then non-loopback, then whatever came first.
pub fn select_candidate(
    candidates: &[CompanionService],
    verify: impl Fn(&CompanionService) -> bool,
) -> Option<CompanionService> {
    candidates
        .iter()
        .find(|svc| svc.is_tethered())
        .or_else(|| candidates.iter().find(|svc| verify(svc)))
        .or_else(|| candidates.iter().find(|svc| !svc.host.starts_with("127.")))
        .or_else(|| candidates.first())
        .cloned()
}

/// `GET /api/status` and look for a phone-family `device_name`. Any failure is `false`.
pub fn probe_device(service: &CompanionService) -> bool {
    let url = format!("{}/api/status", service.base_url());
    let client = match reqwest::blocking::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "probe client unavailable");
            return false;
        }
    };
    let body: Value = match client.get(&url).send().and_then(|r| r.json()) {
        Ok(body) => body,
        Err(e) => {
            debug!(%url, error = %e, "status probe failed");
            return false;
        }
    };
    let device = body
        .get("device_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    DEVICE_KEYWORDS.iter().any(|k| device.contains(k))
}
