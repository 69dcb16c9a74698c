//! Scripted classification service for unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::remote::{
    ClassificationService, Composite, ExportTarget, JobHandle, RemoteState, TrainingSample,
};
use crate::source::{DateWindow, Region, SourceKind, Tile, TileKey, TrainingLabels};

/// Behaviour of one tile.
#[derive(Debug, Clone)]
pub(crate) struct TileScript {
    pub footprint_area: f64,
    pub class_counts: BTreeMap<u32, usize>,
    pub submit_error: Option<String>,
    /// Status answers in order; the last one repeats.
    pub states: Vec<Result<RemoteState, String>>,
}

impl TileScript {
    pub fn completes() -> Self {
        Self {
            footprint_area: 1.0e9,
            class_counts: BTreeMap::from([(1, 40), (5, 60)]),
            submit_error: None,
            states: vec![Ok(RemoteState::Running), Ok(RemoteState::Completed)],
        }
    }

    pub fn empty_geometry() -> Self {
        Self {
            footprint_area: 0.0,
            ..Self::completes()
        }
    }

    pub fn single_class() -> Self {
        Self {
            class_counts: BTreeMap::from([(1, 500)]),
            ..Self::completes()
        }
    }

    pub fn submit_fails(reason: &str) -> Self {
        Self {
            submit_error: Some(reason.to_string()),
            ..Self::completes()
        }
    }

    pub fn with_states(mut self, states: Vec<Result<RemoteState, String>>) -> Self {
        self.states = states;
        self
    }
}

#[derive(Default)]
pub(crate) struct ScriptedService {
    pub catalog: Option<Vec<TileKey>>,
    scripts: HashMap<String, TileScript>,
    queues: Mutex<HashMap<String, VecDeque<Result<RemoteState, String>>>>,
    pub submissions: AtomicUsize,
    pub samples: AtomicUsize,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile(mut self, key: TileKey, script: TileScript) -> Self {
        self.catalog.get_or_insert_with(Vec::new).push(key.clone());
        self.scripts.insert(key.to_string(), script);
        self
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    fn script(&self, key: &str) -> Result<&TileScript, ServiceError> {
        self.scripts
            .get(key)
            .ok_or_else(|| ServiceError::Rejected(format!("unknown tile {}", key)))
    }
}

#[async_trait]
impl ClassificationService for ScriptedService {
    async fn available_tiles(
        &self,
        _source: SourceKind,
        _region: &Region,
        _window: &DateWindow,
    ) -> Result<Vec<TileKey>, ServiceError> {
        self.catalog
            .clone()
            .ok_or_else(|| ServiceError::RequestFailed("index offline".to_string()))
    }

    async fn composite(
        &self,
        tile: &Tile,
        _window: &DateWindow,
        _cloud_cover: f64,
    ) -> Result<Composite, ServiceError> {
        let script = self.script(&tile.key.to_string())?;
        Ok(Composite {
            tile: tile.clone(),
            reference: tile.key.to_string(),
            footprint_area: script.footprint_area,
            scene_count: 3,
        })
    }

    async fn training_sample(
        &self,
        composite: &Composite,
        _labels: &TrainingLabels,
    ) -> Result<TrainingSample, ServiceError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let script = self.script(&composite.reference)?;
        Ok(TrainingSample {
            reference: format!("sample/{}", composite.reference),
            class_counts: script.class_counts.clone(),
        })
    }

    async fn submit(
        &self,
        composite: &Composite,
        _sample: &TrainingSample,
        _target: &ExportTarget,
    ) -> Result<JobHandle, ServiceError> {
        let script = self.script(&composite.reference)?;
        if let Some(ref reason) = script.submit_error {
            return Err(ServiceError::Rejected(reason.clone()));
        }
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        let handle = format!("{}#{}", composite.reference, n);
        if let Ok(mut queues) = self.queues.lock() {
            queues.insert(handle.clone(), script.states.iter().cloned().collect());
        }
        Ok(JobHandle::new(handle))
    }

    async fn status(&self, handle: &JobHandle) -> Result<RemoteState, ServiceError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| ServiceError::RequestFailed("poisoned".to_string()))?;
        let queue = queues
            .get_mut(handle.as_str())
            .ok_or_else(|| ServiceError::UnknownJob(handle.to_string()))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(Ok(state)) => Ok(state),
            Some(Err(message)) => Err(ServiceError::RequestFailed(message)),
            None => Ok(RemoteState::Pending),
        }
    }
}
