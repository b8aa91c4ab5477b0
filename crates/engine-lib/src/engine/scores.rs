//! Published node scores
//!
//! The control loop is the only writer. Each tick it swaps in a complete
//! map, so readers observe either the previous or the next map and never
//! a partially updated one.

use crate::models::NodeScore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

pub type ScoreMap = BTreeMap<String, NodeScore>;

/// Write side, owned by the control loop
pub struct ScoreBoard {
    tx: watch::Sender<Arc<ScoreMap>>,
}

/// Cheap, cloneable read side
#[derive(Clone)]
pub struct ScoreReader {
    rx: watch::Receiver<Arc<ScoreMap>>,
}

pub fn score_board() -> (ScoreBoard, ScoreReader) {
    let (tx, rx) = watch::channel(Arc::new(ScoreMap::new()));
    (ScoreBoard { tx }, ScoreReader { rx })
}

impl ScoreBoard {
    pub fn publish(&self, scores: ScoreMap) {
        self.tx.send_replace(Arc::new(scores));
    }
}

impl ScoreReader {
    /// Latest complete score map
    pub fn snapshot(&self) -> Arc<ScoreMap> {
        self.rx.borrow().clone()
    }
}
