use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum RecordStatus {
    Downloaded,
    Failed { message: String, permanent: bool },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordProgress {
    pub id: String,
    pub index: usize,
    pub status: RecordStatus,
    pub file_count: usize,
    pub bytes: u64,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StageSummary {
    pub stage: &'static str,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StageSummary {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }
}

pub trait EventEmitter: Send + Sync + 'static {
    /// Called once per record, after its outcome has been persisted.
    fn emit_record(&self, progress: &RecordProgress);
    fn emit_summary(&self, summary: &StageSummary);
}
