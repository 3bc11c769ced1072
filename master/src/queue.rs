use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::state::TaskRef;

#[derive(Default)]
struct Inner {
    items: VecDeque<TaskRef>,
    queued: HashSet<TaskRef>,
}

/// Cola compartida de mappers PENDING esperando despacho.
///
/// FIFO por orden de llegada, sin límite de profundidad. Una misma tarea
/// está a lo sumo una vez en la cola. `take` bloquea al despachador
/// hasta que haya algo.
#[derive(Default)]
pub struct MapperQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MapperQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devuelve false si la tarea ya estaba encolada.
    pub fn push(&self, task: TaskRef) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.queued.insert(task) {
                return false;
            }
            inner.items.push_back(task);
        }
        self.notify.notify_one();
        true
    }

    pub fn try_take(&self) -> Option<TaskRef> {
        let mut inner = self.inner.lock();
        let task = inner.items.pop_front()?;
        inner.queued.remove(&task);
        Some(task)
    }

    pub async fn take(&self) -> TaskRef {
        loop {
            let notified = self.notify.notified();
            if let Some(task) = self.try_take() {
                return task;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
