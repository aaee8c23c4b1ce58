//! Proxy pool with usage-capped checkout, blacklisting and rotation.
//!
//! The pool is an in-memory list behind one mutex; rotation means a full
//! reload from the configured source plus a reset of the usage counters.
//! The blacklist survives rotations and only grows until cleared by a new
//! manager.

use crate::config::ProxySettings;
use crate::error::Result;
use crate::retry::jitter_ms;
use log::{error, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Public endpoints used when no file or service is configured. Often
/// unreliable; good enough for smoke runs.
const FALLBACK_PROXIES: &[&str] = &[
    "103.152.112.162:80",
    "193.239.86.249:3128",
    "94.231.94.163:3128",
];

const INTER_TEST_DELAY: Duration = Duration::from_secs(1);
const SERVICE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the pool is (re)loaded from on construction and rotation.
#[derive(Debug, Clone)]
pub enum PoolSource {
    /// JSON (array or `{"proxies": [...]}`) with line-based fallback.
    File(PathBuf),
    /// Vendor service looked up by name; key from `<SERVICE>_API_KEY`.
    Service(String),
    Static(Vec<String>),
}

impl PoolSource {
    fn load(&self) -> Vec<String> {
        match self {
            PoolSource::File(path) => match std::fs::read_to_string(path) {
                Ok(content) => {
                    let proxies = parse_proxy_file(&content);
                    info!("loaded {} proxies from file {}", proxies.len(), path.display());
                    proxies
                }
                Err(e) => {
                    error!("error loading proxies from {}: {e}", path.display());
                    Vec::new()
                }
            },
            PoolSource::Service(name) => load_from_service(name),
            PoolSource::Static(proxies) => proxies.clone(),
        }
    }
}

/// JSON array, JSON object with a `proxies` array, or one proxy per line.
fn parse_proxy_file(content: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Ok(Value::Object(map)) => match map.get("proxies").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => {
                warn!("unexpected JSON shape in proxy file, trying line-based parsing");
                parse_proxy_lines(content)
            }
        },
        _ => parse_proxy_lines(content),
    }
}

fn parse_proxy_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_from_service(service: &str) -> Vec<String> {
    let env_var = format!("{}_API_KEY", service.to_ascii_uppercase());
    let api_key = match std::env::var(&env_var) {
        Ok(key) => key,
        Err(_) => {
            warn!("no api key found for {service}; set the {env_var} environment variable");
            return Vec::new();
        }
    };

    let proxies = match service.to_ascii_lowercase().as_str() {
        "brightdata" => fetch_brightdata_list(&api_key),
        "scraperapi" => vec![format!(
            "http://proxy-server.scraperapi.com:8001?api_key={api_key}"
        )],
        "zyte" => vec![format!("http://proxy.zyte.com:8011?apikey={api_key}")],
        other => {
            warn!("unsupported proxy service: {other}");
            Vec::new()
        }
    };
    info!("loaded {} proxies from {service}", proxies.len());
    proxies
}

fn fetch_brightdata_list(api_key: &str) -> Vec<String> {
    let fetched: Result<Vec<String>> = (|| {
        let client = reqwest::blocking::Client::builder()
            .timeout(SERVICE_FETCH_TIMEOUT)
            .build()?;
        let resp = client
            .get("https://api.brightdata.com/proxy/list")
            .bearer_auth(api_key)
            .send()?;
        if !resp.status().is_success() {
            error!("proxy service returned status {}", resp.status());
            return Ok(Vec::new());
        }
        let body: Value = resp.json()?;
        Ok(body
            .get("proxies")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    })();

    match fetched {
        Ok(proxies) => proxies,
        Err(e) => {
            error!("error loading proxies from brightdata: {e}");
            Vec::new()
        }
    }
}

struct PoolState {
    proxies: Vec<String>,
    uses: HashMap<String, u32>,
    blacklist: HashSet<String>,
    last_rotation: Instant,
}

pub struct ProxyManager {
    source: PoolSource,
    max_uses: u32,
    rotation_interval: Duration,
    probe_url: String,
    probe_timeout: Duration,
    state: Mutex<PoolState>,
}

impl ProxyManager {
    /// Build from settings: file source if configured and present, else
    /// service, else the hard-coded public fallback list.
    pub fn new(settings: &ProxySettings) -> Self {
        let source = match (&settings.proxy_file, &settings.service) {
            (Some(path), _) if path.exists() => PoolSource::File(path.clone()),
            (_, Some(service)) => PoolSource::Service(service.clone()),
            _ => {
                warn!("using fallback public proxies; these may be unreliable");
                PoolSource::Static(FALLBACK_PROXIES.iter().map(|p| p.to_string()).collect())
            }
        };
        Self::with_source(source, settings)
    }

    pub fn with_source(source: PoolSource, settings: &ProxySettings) -> Self {
        let proxies = source.load();
        info!("proxy manager initialized with {} proxies", proxies.len());
        Self {
            source,
            max_uses: settings.max_uses,
            rotation_interval: settings.rotation_interval(),
            probe_url: settings.probe_url.clone(),
            probe_timeout: settings.probe_timeout(),
            state: Mutex::new(PoolState {
                proxies,
                uses: HashMap::new(),
                blacklist: HashSet::new(),
                last_rotation: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check out the least-used proxy, or `None` when the pool has
    /// nothing usable. Callers must treat `None` as "go direct or skip",
    /// not as an error.
    pub fn get_proxy(&self) -> Option<String> {
        self.get_proxy_excluding(&[])
    }

    /// Like [`get_proxy`](Self::get_proxy) with an extra per-call
    /// exclusion set on top of the blacklist.
    pub fn get_proxy_excluding(&self, exclude: &[String]) -> Option<String> {
        let mut state = self.lock();

        if state.last_rotation.elapsed() > self.rotation_interval {
            info!("rotating proxies due to time interval");
            self.rotate(&mut state);
        }

        let candidate = match least_used(&state, exclude) {
            Some(proxy) => proxy,
            None => {
                warn!("no proxies available");
                return None;
            }
        };

        // Pool exhausted: every usable proxy is at the cap. Refresh once
        // and pick again from the rested pool.
        let candidate = if state.uses.get(&candidate).copied().unwrap_or(0) >= self.max_uses {
            info!("all proxies have reached max uses, refreshing proxy list");
            self.rotate(&mut state);
            match least_used(&state, exclude) {
                Some(proxy) => proxy,
                None => {
                    warn!("no proxies available after rotation");
                    return None;
                }
            }
        } else {
            candidate
        };

        *state.uses.entry(candidate.clone()).or_insert(0) += 1;
        Some(candidate)
    }

    fn rotate(&self, state: &mut PoolState) {
        state.proxies = self.source.load();
        state.uses.clear();
        state.last_rotation = Instant::now();
    }

    /// Exclude a proxy from all future checkouts. Idempotent; survives
    /// rotations.
    pub fn blacklist(&self, proxy: &str) {
        let mut state = self.lock();
        if state.blacklist.insert(proxy.to_string()) {
            info!("proxy {proxy} added to blacklist");
        }
    }

    /// Probe one proxy against the configured endpoint. Does not touch
    /// pool state.
    pub fn test(&self, proxy: &str) -> bool {
        match self.probe(proxy) {
            Ok(ok) => ok,
            Err(e) => {
                warn!("proxy {proxy} test failed: {e}");
                false
            }
        }
    }

    fn probe(&self, proxy: &str) -> Result<bool> {
        let addr = if proxy.starts_with("http") {
            proxy.to_string()
        } else {
            format!("http://{proxy}")
        };
        let client = reqwest::blocking::Client::builder()
            .proxy(reqwest::Proxy::all(&addr)?)
            .timeout(self.probe_timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        let resp = client.get(&self.probe_url).send()?;
        Ok(resp.status().is_success())
    }

    /// Probe every pool member sequentially, spacing the probes out, and
    /// blacklist the failures.
    pub fn test_all(&self) -> BTreeMap<String, bool> {
        let proxies = self.lock().proxies.clone();
        let mut results = BTreeMap::new();
        for (idx, proxy) in proxies.iter().enumerate() {
            let ok = self.test(proxy);
            if !ok {
                self.blacklist(proxy);
            }
            results.insert(proxy.clone(), ok);
            if idx + 1 < proxies.len() {
                std::thread::sleep(INTER_TEST_DELAY);
            }
        }
        results
    }

    /// Uniform pick from pool minus blacklist, ignoring usage counts.
    pub fn get_random_proxy(&self) -> Option<String> {
        let state = self.lock();
        let candidates: Vec<&String> = state
            .proxies
            .iter()
            .filter(|p| !state.blacklist.contains(*p))
            .collect();
        if candidates.is_empty() {
            warn!("no proxies available for random selection");
            return None;
        }
        let idx = jitter_ms(candidates.len() as u64) as usize;
        Some(candidates[idx].clone())
    }

    pub fn pool_size(&self) -> usize {
        self.lock().proxies.len()
    }
}

/// First minimum by usage count; ties resolve to the earliest pool index,
/// so the order is stable across calls regardless of map iteration order.
fn least_used(state: &PoolState, exclude: &[String]) -> Option<String> {
    let mut best: Option<(&String, u32)> = None;
    for proxy in &state.proxies {
        if state.blacklist.contains(proxy) || exclude.contains(proxy) {
            continue;
        }
        let uses = state.uses.get(proxy).copied().unwrap_or(0);
        match best {
            Some((_, lowest)) if uses >= lowest => {}
            _ => best = Some((proxy, uses)),
        }
    }
    best.map(|(proxy, _)| proxy.clone())
}
