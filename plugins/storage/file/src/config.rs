// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_file_name() -> String {
    "calls.json".into()
}

#[derive(Debug, serde::Deserialize)]
pub struct FileBackendConfig {
    /// Directory holding the snapshot file. Created on init.
    pub data_dir: String,
    /// Snapshot file name inside `data_dir`.
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

impl FileBackendConfig {
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            file_name: default_file_name(),
        }
    }
}
