// Durable JSONL log for persistent events. One event per line, appended
// atomically per line; readable by any conformant parser.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{FabricError, Result};

use super::Event;

pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Append a single event as one JSON line.
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| FabricError::Persistence(format!("open {:?}: {}", self.path, e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| FabricError::Persistence(format!("append {:?}: {}", self.path, e)))?;
        Ok(())
    }

    // Read every persisted event, oldest first. A missing file is an
    // empty log. Unparseable lines are skipped with a warning so one bad
    // record cannot block recovery.
    pub async fn read_all(&self) -> Result<Vec<Event>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FabricError::Persistence(format!(
                    "read {:?}: {}",
                    self.path, e
                )))
            }
        };

        let mut events = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping unparseable event at {:?}:{}: {}",
                    self.path,
                    lineno + 1,
                    e
                ),
            }
        }
        Ok(events)
    }

    // Remove the log file. Returns false when there was nothing to clear.
    pub async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Cleared event log {:?}", self.path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FabricError::Persistence(format!(
                "clear {:?}: {}",
                self.path, e
            ))),
        }
    }
}
