/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::fdbkube::api::cluster::ClusterKey;
use crate::fdbkube::config::Config;
use crate::fdbkube::controller::reconcile::{DependencyHandle, ReconcileContext};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Controller runtime that offers a work queue and shared dependencies.
pub struct ControllerRuntime {
    dependencies: DependencyRegistry,
    work_queue: WorkQueue<ClusterKey>,
}

impl ControllerRuntime {
    /// Creates a runtime whose queue is sized by `FDBKUBE_QUEUE_CAPACITY`.
    pub fn new() -> Arc<Self> {
        Arc::new(ControllerRuntime::with_capacity(
            Config::QueueCapacity.get_usize(),
        ))
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            dependencies: DependencyRegistry::new(),
            work_queue: WorkQueue::new(capacity),
        }
    }

    pub fn register_dependency<T>(&self, dependency: Arc<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.dependencies.insert(dependency)
    }

    /// Registers a trait-object dependency behind a [`DependencyHandle`].
    pub fn register_handle<T>(&self, dependency: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let _ = self.register_dependency(Arc::new(DependencyHandle::new(dependency)));
    }

    pub fn dependency<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.dependencies.get::<T>()
    }

    pub fn context(&self) -> ReconcileContext<'_> {
        ReconcileContext::new(self)
    }

    pub fn work_queue(&self) -> WorkQueue<ClusterKey> {
        self.work_queue.clone()
    }

    pub fn spawn_executor<H, Fut>(&self, handler: H) -> JoinHandle<()>
    where
        H: Fn(ClusterKey) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let queue = self.work_queue.clone();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Some(item) = queue.next().await {
                let fut = (handler.as_ref())(item);
                fut.await;
            }
        })
    }
}

#[derive(Default)]
struct DependencyRegistry {
    values: StdRwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl DependencyRegistry {
    fn new() -> Self {
        Self {
            values: StdRwLock::new(HashMap::new()),
        }
    }

    fn insert<T>(&self, dependency: Arc<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let mut guard = self
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let existing = guard.insert(
            TypeId::of::<T>(),
            dependency as Arc<dyn Any + Send + Sync>,
        );
        existing.and_then(|arc| arc.downcast::<T>().ok())
    }

    fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let guard = self
            .values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.clone().downcast::<T>().ok())
    }
}

#[derive(Clone)]
pub struct WorkQueue<T> {
    inner: Arc<WorkQueueInner<T>>,
}

struct WorkQueueInner<T> {
    sender: mpsc::Sender<T>,
    receiver: Mutex<mpsc::Receiver<T>>,
}

impl<T> WorkQueue<T>
where
    T: Send + 'static,
{
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            inner: Arc::new(WorkQueueInner {
                sender,
                receiver: Mutex::new(receiver),
            }),
        }
    }

    pub async fn enqueue(&self, item: T) -> Result<(), mpsc::error::SendError<T>> {
        self.inner.sender.send(item).await
    }

    pub async fn next(&self) -> Option<T> {
        let mut guard = self.inner.receiver.lock().await;
        guard.recv().await
    }
}
