use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use regulator_common::{ActuatorSnapshot, NameIdMap, RegulatorConfig, WeatherResponse};

use crate::{
    adapters::{ActuatorAdapter, FetchError, WeatherAdapter},
    resilient::{SnapshotStore, Upstream},
};

pub struct ScriptedUpstream<T> {
    script: Mutex<VecDeque<Result<T, FetchError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl<T> ScriptedUpstream<T> {
    pub fn new(script: Vec<Result<T, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Send + Sync> Upstream<T> for ScriptedUpstream<T> {
    async fn fetch(&self) -> Result<T, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Unavailable("script exhausted".to_string())))
    }
}

pub struct MemorySnapshot<T> {
    value: Mutex<Option<T>>,
    broken: bool,
}

impl<T: Clone> MemorySnapshot<T> {
    pub fn empty() -> Self {
        Self {
            value: Mutex::new(None),
            broken: false,
        }
    }

    pub fn with(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            broken: false,
        }
    }

    pub fn broken() -> Self {
        Self {
            value: Mutex::new(None),
            broken: true,
        }
    }

    pub fn current(&self) -> Option<T> {
        self.value.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> SnapshotStore<T> for MemorySnapshot<T> {
    async fn load(&self) -> anyhow::Result<Option<T>> {
        if self.broken {
            anyhow::bail!("snapshot corrupted");
        }
        Ok(self.current())
    }

    async fn save(&self, value: &T) -> anyhow::Result<()> {
        *self.value.lock().unwrap() = Some(value.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub id: String,
    pub value: String,
    pub flags: String,
    pub index: String,
}

// Writes are stored scaled down by ten, the way the controller displays them.
pub struct FakeActuator {
    variables: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<RecordedWrite>>,
    fail_fetch: Mutex<Option<FetchError>>,
    fail_write: bool,
    ignore_writes: bool,
}

impl FakeActuator {
    pub fn new(variables: &[(&str, &str)]) -> Self {
        Self {
            variables: Mutex::new(
                variables
                    .iter()
                    .map(|(id, value)| (id.to_string(), value.to_string()))
                    .collect(),
            ),
            writes: Mutex::new(Vec::new()),
            fail_fetch: Mutex::new(None),
            fail_write: false,
            ignore_writes: false,
        }
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_write = true;
        self
    }

    // Like a controller that lags.
    pub fn ignoring_writes(mut self) -> Self {
        self.ignore_writes = true;
        self
    }

    pub fn fail_fetches_with(&self, err: FetchError) {
        *self.fail_fetch.lock().unwrap() = Some(err);
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn value(&self, id: &str) -> Option<String> {
        self.variables.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl ActuatorAdapter for FakeActuator {
    async fn fetch_snapshot(
        &self,
        _config: &RegulatorConfig,
        names: &NameIdMap,
    ) -> Result<ActuatorSnapshot, FetchError> {
        if let Some(err) = self.fail_fetch.lock().unwrap().clone() {
            return Err(err);
        }
        let variables = self.variables.lock().unwrap();
        let mut snapshot = ActuatorSnapshot::new();
        for (_, entry) in names.entries() {
            if let Some(value) = variables.get(&entry.id) {
                snapshot.set(entry.id.clone(), value.clone());
            }
        }
        Ok(snapshot)
    }

    async fn write_variable(
        &self,
        _config: &RegulatorConfig,
        id: &str,
        value: &str,
        flags: &str,
        index: &str,
    ) -> Result<(), FetchError> {
        if self.fail_write {
            return Err(FetchError::Unavailable("write rejected".to_string()));
        }
        self.writes.lock().unwrap().push(RecordedWrite {
            id: id.to_string(),
            value: value.to_string(),
            flags: flags.to_string(),
            index: index.to_string(),
        });
        if !self.ignore_writes {
            let raw: f64 = value
                .parse()
                .map_err(|_| FetchError::Decode(value.to_string()))?;
            self.variables
                .lock()
                .unwrap()
                .insert(id.to_string(), format!("{}", raw / 10.0));
        }
        Ok(())
    }

    async fn fetch_variable(
        &self,
        _config: &RegulatorConfig,
        id: &str,
    ) -> Result<Option<String>, FetchError> {
        Ok(self.value(id))
    }
}

pub struct FakeWeather {
    response: Mutex<Result<WeatherResponse, FetchError>>,
    calls: AtomicUsize,
}

impl FakeWeather {
    pub fn indoor(indoor: f64) -> Self {
        Self::responding(WeatherResponse {
            code: 0,
            msg: "success".to_string(),
            data: Some(station_data(indoor, 8.0)),
        })
    }

    pub fn responding(response: WeatherResponse) -> Self {
        Self {
            response: Mutex::new(Ok(response)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: FetchError) -> Self {
        Self {
            response: Mutex::new(Err(err)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, err: FetchError) {
        *self.response.lock().unwrap() = Err(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherAdapter for FakeWeather {
    async fn fetch_snapshot(&self) -> Result<WeatherResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }
}

pub fn station_data(indoor: f64, outdoor: f64) -> Value {
    json!({
        "indoor": {"temperature": {"time": "1760875503", "unit": "℃", "value": indoor.to_string()}},
        "outdoor": {"temperature": {"time": "1760875503", "unit": "℃", "value": outdoor.to_string()}}
    })
}

pub async fn serve(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
