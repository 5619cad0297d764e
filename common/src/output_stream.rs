use std::sync::Arc;

use parking_lot::Mutex;

/// Collects lines written by a producer so tests can assert on them.
#[derive(Debug, Default, Clone)]
pub struct OutputStream(Arc<Mutex<Vec<String>>>);

impl OutputStream {
    pub fn new() -> Self {
        OutputStream(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn write<S: Into<String>>(&self, s: S) {
        self.0.lock().push(s.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}
