use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl ProgressRecord {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: None,
            progress: 0.0,
            loaded: None,
            total: None,
        }
    }
}

/// In-flight model file downloads, in the order they were initiated.
#[derive(Debug, Clone, Default)]
pub struct ProgressRegistry {
    records: Vec<ProgressRecord>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `file`. A repeated `initiate` for a tracked file is a no-op.
    pub fn on_initiate(&mut self, file: &str, name: Option<&str>) {
        if self.position(file).is_some() {
            return;
        }
        let mut record = ProgressRecord::new(file);
        record.name = name.map(str::to_string);
        self.records.push(record);
    }

    pub fn on_progress(
        &mut self,
        file: &str,
        progress: f64,
        loaded: Option<u64>,
        total: Option<u64>,
    ) {
        let Some(idx) = self.position(file) else {
            return;
        };
        let record = &mut self.records[idx];
        record.progress = progress;
        if loaded.is_some() {
            record.loaded = loaded;
        }
        if total.is_some() {
            record.total = total;
        }
    }

    pub fn on_done(&mut self, file: &str) {
        if let Some(idx) = self.position(file) {
            self.records.remove(idx);
        }
    }

    pub fn snapshot(&self) -> &[ProgressRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Mean percentage across tracked files, `None` when nothing is loading.
    pub fn overall_progress(&self) -> Option<f64> {
        if self.records.is_empty() {
            return None;
        }
        let sum: f64 = self.records.iter().map(|r| r.progress).sum();
        Some(sum / self.records.len() as f64)
    }

    fn position(&self, file: &str) -> Option<usize> {
        self.records.iter().position(|r| r.file == file)
    }
}
