use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::observability::COMPACTIONS_TOTAL;

/// Compact the WAL once `threshold` appends have piled up since the last
/// rewrite. Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    debug!(appends, threshold, "compaction threshold reached");
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            Ok(true)
        }
        Err(e) => {
            metrics::counter!(COMPACTIONS_TOTAL, "status" => "error").increment(1);
            Err(e)
        }
    }
}

/// Background task that checks the WAL every `period`.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match compact_if_needed(&engine, threshold).await {
            Ok(true) => info!("compacted WAL after {threshold}+ appends"),
            Ok(false) => {}
            Err(e) => warn!("compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::SwimStyle;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("swimslot_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), EngineConfig::default()).unwrap();
        let styles = BTreeSet::from([SwimStyle::Freestyle]);
        let id = Ulid::new();
        engine.register_instructor(id, "Dana", styles.clone()).await.unwrap();
        for _ in 0..4 {
            engine
                .update_instructor_styles(id, styles.clone())
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(!compact_if_needed(&engine, 10).await.unwrap());
        assert!(compact_if_needed(&engine, 5).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        drop(engine);
        let reopened = Engine::new(path, EngineConfig::default()).unwrap();
        assert_eq!(reopened.get_instructor(id).unwrap().name, "Dana");
    }
}
