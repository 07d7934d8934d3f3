use async_trait::async_trait;
use fareprobe_common::persistence::{AddressCorpus, DirectionSink, RouteSink};
use fareprobe_common::{
    AddressRecord, DirectionRecord, ProbeError, Result, RouteResult,
};
use fareprobe_drivers::browser::{BrowserPage, ObservedResponse, PageLauncher, ResponseStream};
use fareprobe_poll::{
    AcquisitionSettings, AcquisitionStateMachine, Backoff, GeoSampler, ResponseInterceptor,
    RunLoop, SamplerSettings,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DIRECTIONS: &str = "https://www.uber.com/api/loadFEDirections";

fn address(id: &str, latitude: f64, longitude: f64) -> AddressRecord {
    AddressRecord {
        id: id.to_string(),
        latitude,
        longitude,
        house_number: "100".to_string(),
        street: format!("{id} Ave"),
        postcode: "90012".to_string(),
    }
}

fn a() -> AddressRecord {
    address("A", 34.05, -118.24)
}

fn b() -> AddressRecord {
    address("B", 34.20, -118.50)
}

/// Roughly two miles north of A.
fn c() -> AddressRecord {
    address("C", 34.079, -118.24)
}

/// Replays scripted pairs, cycling once the script is used up.
struct ScriptedCorpus {
    pairs: Vec<Vec<AddressRecord>>,
    next: AtomicUsize,
}

impl ScriptedCorpus {
    fn new(pairs: Vec<Vec<AddressRecord>>) -> Arc<Self> {
        Arc::new(Self {
            pairs,
            next: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AddressCorpus for ScriptedCorpus {
    async fn sample(&self, _size: usize) -> Result<Vec<AddressRecord>> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(self.pairs[n % self.pairs.len()].clone())
    }
}

/// In-memory stand-in for the store, with the unique pair index on directions.
#[derive(Default)]
struct MemoryStore {
    routes: Mutex<Vec<RouteResult>>,
    directions: Mutex<Vec<DirectionRecord>>,
}

#[async_trait]
impl RouteSink for MemoryStore {
    async fn insert_route(&self, result: RouteResult) -> Result<()> {
        self.routes.lock().unwrap().push(result);
        Ok(())
    }
}

#[async_trait]
impl DirectionSink for MemoryStore {
    async fn insert_direction(&self, record: DirectionRecord) -> Result<()> {
        let mut directions = self.directions.lock().unwrap();
        if directions
            .iter()
            .any(|d| d.pickup_id == record.pickup_id && d.destination_id == record.destination_id)
        {
            return Err(ProbeError::PersistenceWrite {
                sink: "directions",
                source: anyhow::anyhow!("UNIQUE constraint failed"),
            });
        }
        directions.push(record);
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct PageScript {
    results_visible: bool,
    fire_directions: bool,
}

struct FakePage {
    script: PageScript,
    tx: Mutex<Option<mpsc::UnboundedSender<ObservedResponse>>>,
    rx: Mutex<Option<ResponseStream>>,
    fills: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, _url: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn clear(&self, _selector: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn type_text(&self, _selector: &str, _text: &str) -> anyhow::Result<()> {
        self.fills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn press_enter(&self, _selector: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn wait_for_visible(&self, _selector: &str, _timeout: Duration) -> anyhow::Result<bool> {
        if self.script.fire_directions {
            if let Some(tx) = self.tx.lock().unwrap().as_ref() {
                let _ = tx.send(ObservedResponse {
                    url: DIRECTIONS.to_string(),
                    status: Some(200),
                    body: r#"{"routes":[{"duration":1234}]}"#.to_string(),
                });
            }
        }
        Ok(self.script.results_visible)
    }
    async fn screenshot(&self, _path: &Path) -> anyhow::Result<()> {
        Ok(())
    }
    async fn texts(&self, _selector: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec!["UberX $18.10 - $24.90".to_string(), "Comfort $27".to_string()])
    }
    fn subscribe_responses(&self) -> Option<ResponseStream> {
        self.rx.lock().unwrap().take()
    }
    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.tx.lock().unwrap().take();
        Ok(())
    }
}

/// Hands out pages following `scripts` in order (the last one repeats) and
/// cancels `stop_after` pages in.
struct FakeLauncher {
    scripts: Mutex<VecDeque<PageScript>>,
    opened: AtomicUsize,
    stop_after: usize,
    cancel: CancellationToken,
    fills: Arc<AtomicUsize>,
}

impl FakeLauncher {
    fn new(scripts: Vec<PageScript>, stop_after: usize, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            opened: AtomicUsize::new(0),
            stop_after,
            cancel,
            fills: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl PageLauncher for FakeLauncher {
    async fn open_page(&self) -> anyhow::Result<Box<dyn BrowserPage>> {
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.len() > 1 {
                scripts.pop_front()
            } else {
                scripts.front().copied()
            }
        }
        .ok_or_else(|| anyhow::anyhow!("no page script"))?;

        if self.opened.fetch_add(1, Ordering::SeqCst) + 1 >= self.stop_after {
            self.cancel.cancel();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(FakePage {
            script,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            fills: self.fills.clone(),
        }))
    }
}

fn run_loop(
    launcher: Arc<FakeLauncher>,
    corpus: Arc<ScriptedCorpus>,
    store: Arc<MemoryStore>,
) -> RunLoop {
    let sampler = GeoSampler::new(corpus, SamplerSettings::default());
    let acquisition = AcquisitionStateMachine::new(AcquisitionSettings {
        settle_delay: Duration::ZERO,
        ..AcquisitionSettings::default()
    });
    let interceptor = ResponseInterceptor::new(DIRECTIONS, store.clone());
    RunLoop::new(launcher, sampler, acquisition, interceptor, store).with_backoff(Backoff {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(4),
    })
}

async fn wait_for_directions(store: &MemoryStore, expected: usize) {
    for _ in 0..200 {
        if store.directions.lock().unwrap().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

const OK_NO_DIRECTIONS: PageScript = PageScript {
    results_visible: true,
    fire_directions: false,
};

const OK_WITH_DIRECTIONS: PageScript = PageScript {
    results_visible: true,
    fire_directions: true,
};

const NEVER_RENDERS: PageScript = PageScript {
    results_visible: false,
    fire_directions: false,
};

#[tokio::test]
async fn sampler_skips_short_pair_and_accepts_a_to_b() {
    let cancel = CancellationToken::new();
    let launcher = FakeLauncher::new(vec![OK_NO_DIRECTIONS], 1, cancel.clone());
    let corpus = ScriptedCorpus::new(vec![vec![a(), c()], vec![a(), b()]]);
    let store = Arc::new(MemoryStore::default());

    let result = run_loop(launcher, corpus, store.clone())
        .run_iteration()
        .await
        .unwrap();

    assert_eq!(result.pickup_id, "A");
    assert_eq!(result.destination_id, "B");
    let miles = result.distance_meters / fareprobe_common::METERS_PER_MILE;
    assert!((5.0..=30.0).contains(&miles));
    assert_eq!(result.prices.len(), 2);
    assert_eq!(result.prices[0].label, "UberX ");
    assert_eq!(store.routes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn results_never_rendering_persists_nothing_and_loop_moves_on() {
    let cancel = CancellationToken::new();
    let launcher = FakeLauncher::new(vec![NEVER_RENDERS, OK_NO_DIRECTIONS], 2, cancel.clone());
    let corpus = ScriptedCorpus::new(vec![vec![a(), b()]]);
    let store = Arc::new(MemoryStore::default());

    let stats = run_loop(launcher.clone(), corpus, store.clone())
        .run_forever(cancel)
        .await;

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
    // Three attempts of two fields on the failing page, one attempt on the next.
    assert_eq!(launcher.fills.load(Ordering::SeqCst), 6 + 2);
    assert_eq!(store.routes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn silent_directions_endpoint_still_persists_the_route() {
    let cancel = CancellationToken::new();
    let launcher = FakeLauncher::new(vec![OK_NO_DIRECTIONS], 1, cancel.clone());
    let corpus = ScriptedCorpus::new(vec![vec![a(), b()]]);
    let store = Arc::new(MemoryStore::default());

    run_loop(launcher, corpus, store.clone())
        .run_iteration()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.routes.lock().unwrap().len(), 1);
    assert!(store.directions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn directions_are_stored_once_per_pair() {
    let cancel = CancellationToken::new();
    let launcher = FakeLauncher::new(vec![OK_WITH_DIRECTIONS], 2, cancel.clone());
    let corpus = ScriptedCorpus::new(vec![vec![a(), b()]]);
    let store = Arc::new(MemoryStore::default());

    let stats = run_loop(launcher, corpus, store.clone())
        .run_forever(cancel)
        .await;
    wait_for_directions(&store, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(stats.succeeded, 2);
    assert_eq!(store.routes.lock().unwrap().len(), 2);
    let directions = store.directions.lock().unwrap();
    assert_eq!(directions.len(), 1);
    assert_eq!(directions[0].pickup_id, "A");
    assert_eq!(directions[0].payload["routes"][0]["duration"], 1234);
}

#[tokio::test]
async fn sampled_routes_always_fall_inside_the_window() {
    let cancel = CancellationToken::new();
    let launcher = FakeLauncher::new(vec![OK_NO_DIRECTIONS], 5, cancel.clone());
    let corpus = ScriptedCorpus::new(vec![
        vec![a(), c()],
        vec![c(), a()],
        vec![a(), a()],
        vec![b(), c()],
        vec![a(), b()],
    ]);
    let store = Arc::new(MemoryStore::default());

    run_loop(launcher, corpus, store.clone())
        .run_forever(cancel)
        .await;

    let routes = store.routes.lock().unwrap();
    assert_eq!(routes.len(), 5);
    for route in routes.iter() {
        let miles = route.distance_meters / fareprobe_common::METERS_PER_MILE;
        assert!((5.0..=30.0).contains(&miles), "{miles} miles");
        assert_ne!(route.pickup_id, route.destination_id);
    }
}
