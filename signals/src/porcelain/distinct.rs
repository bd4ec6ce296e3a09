use std::sync::Mutex;

use crate::{broadcast::Listener, observable::Observer};

/// Wraps a listener so that consecutive duplicate values are dropped before they reach it.
/// Completion is passed through.
pub fn distinct_until_changed<T>(downstream: Listener<T>) -> Listener<T>
where T: Clone + PartialEq + Send + Sync + 'static {
    Listener::observer(Distinct { last: Mutex::new(None), downstream })
}

struct Distinct<T> {
    last: Mutex<Option<T>>,
    downstream: Listener<T>,
}

impl<T> Observer<T> for Distinct<T>
where T: Clone + PartialEq + Send + Sync + 'static
{
    fn on_next(&self, value: T) {
        {
            let mut last = self.last.lock().expect("distinct lock poisoned");
            if last.as_ref() == Some(&value) {
                return;
            }
            *last = Some(value.clone());
        }
        self.downstream.next(value);
    }

    fn on_completed(&self) { self.downstream.completed(); }
}
