// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch pump: keeps a reflector store current and reports typed changes.
//!
//! kube's watcher only yields the new revision of an object. The pump keeps
//! the last revision it saw per object so handlers receive both sides of an
//! update, and it synthesizes deletes for objects missing from a relist.

use crate::events::ResourceEvent;
use futures::{Stream, StreamExt};
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns raw watcher events into [`ResourceEvent`]s.
pub struct EventTracker<K>
where
    K: Resource,
    K::DynamicType: Eq + Hash + Clone,
{
    known: HashMap<ObjectRef<K>, Arc<K>>,
    relist: Option<HashSet<ObjectRef<K>>>,
}

impl<K> Default for EventTracker<K>
where
    K: Resource,
    K::DynamicType: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relist: None,
        }
    }
}

impl<K> EventTracker<K>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one watcher event.
    pub fn track(&mut self, event: Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            Event::Apply(obj) => vec![self.upsert(obj)],
            Event::Delete(obj) => {
                let key = ObjectRef::from_obj(&obj);
                self.known.remove(&key);
                vec![ResourceEvent::Deleted(Arc::new(obj))]
            }
            Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(ObjectRef::from_obj(&obj));
                }
                vec![self.upsert(obj)]
            }
            Event::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return Vec::new();
                };
                let gone: Vec<ObjectRef<K>> = self
                    .known
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(ResourceEvent::Deleted)
                    .collect()
            }
        }
    }

    fn upsert(&mut self, obj: K) -> ResourceEvent<K> {
        let new = Arc::new(obj);
        match self.known.insert(ObjectRef::from_obj(&new), new.clone()) {
            Some(old) => ResourceEvent::Updated { old, new },
            None => ResourceEvent::Added(new),
        }
    }
}

/// Raw watch stream of `api` with kube's default retry backoff.
pub fn watch_stream<K>(api: Api<K>) -> impl Stream<Item = Result<Event<K>, watcher::Error>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, watcher::Config::default()).default_backoff()
}

/// Drive `stream` into `writer`, calling `handler` with every change.
///
/// Returns when the stream ends. Watch errors are logged; the stream retries
/// on its own.
pub async fn pump<K, S, F>(kind: &str, stream: S, mut writer: Writer<K>, mut handler: F)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    S: Stream<Item = Result<Event<K>, watcher::Error>>,
    F: FnMut(ResourceEvent<K>),
{
    let mut tracker = EventTracker::new();
    futures::pin_mut!(stream);
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                writer.apply_watcher_event(&event);
                for change in tracker.track(event) {
                    handler(change);
                }
            }
            Err(e) => warn!(kind, error = %e, "Watch error"),
        }
    }
    debug!(kind, "Watch stream ended");
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod watch_tests;
