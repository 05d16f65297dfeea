use std::path::Path;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::fs as async_fs;
use crate::error::Result;

/// First instant strictly after `now` on the grid `anchor + k * interval`.
pub fn next_aligned_run(anchor: DateTime<Utc>, interval: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let Ok(step) = chrono::Duration::from_std(interval) else {
        return now;
    };
    if step <= chrono::Duration::zero() {
        return now;
    }
    if now < anchor {
        return anchor;
    }

    let step_ms = step.num_milliseconds().max(1);
    let periods = (now - anchor).num_milliseconds() / step_ms + 1;
    anchor + chrono::Duration::milliseconds(step_ms.saturating_mul(periods))
}

/// Writes `data` to `path` through a sibling temp file and a rename, so
/// readers see either the old file or the new one, never a partial write.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    async_fs::write(&tmp, data).await?;
    if let Err(e) = async_fs::rename(&tmp, path).await {
        let _ = async_fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
