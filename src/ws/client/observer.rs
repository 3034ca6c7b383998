use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

/// Handle of a registered observer, used to remove it
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Observer list, subscriber id -> callback
pub(crate) struct Observers<T: ?Sized> {
    next_id: AtomicU64,
    list: Mutex<Vec<(ObserverId, Callback<T>)>>,
}

impl<T: ?Sized> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            list: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.list.lock().len())
            .finish()
    }
}

impl<T: ?Sized> Observers<T> {
    pub fn add<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.list.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        let mut list = self.list.lock();
        let before = list.len();
        list.retain(|(i, _)| *i != id);
        list.len() != before
    }

    /// Call every observer with value, callbacks may add or remove observers
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self.list.lock().iter().map(|(_, c)| c.clone()).collect();
        for callback in snapshot {
            callback(value);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_add_notify_remove() {
        let observers: Observers<str> = Observers::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let id = observers.add(move |s: &str| {
            assert_eq!(s, "hi");
            h.fetch_add(1, Ordering::SeqCst);
        });

        observers.notify("hi");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(observers.remove(id));
        assert!(!observers.remove(id));

        observers.notify("hi");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_remove_itself() {
        let observers: Arc<Observers<u32>> = Arc::new(Observers::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let slot = Arc::new(Mutex::new(None));
        let (o, h, s) = (observers.clone(), hits.clone(), slot.clone());
        let id = observers.add(move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = s.lock().take() {
                o.remove(id);
            }
        });
        *slot.lock() = Some(id);

        observers.notify(&1);
        observers.notify(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
