use rollcall_core::{AnalyzerError, DetectedFace, FaceAnalyzer};
use rollcall_hw::Frame;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from camera workers to the engine thread.
enum EngineRequest {
    Analyze {
        frame: Arc<Frame>,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Both camera workers share one analyzer; requests are served in arrival
/// order.
#[derive(Clone)]
pub struct AnalysisHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl AnalysisHandle {
    /// Detect faces in `frame` and extract their embeddings.
    pub async fn analyze(&self, frame: Arc<Frame>) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze { frame, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The analyzer may block (network round-trip or inference), so it never
/// runs on the async runtime. The thread exits once every handle is dropped.
pub fn spawn_engine(mut analyzer: Box<dyn FaceAnalyzer>) -> Result<AnalysisHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { frame, reply } => {
                        let result = analyzer
                            .analyze(&frame.data, frame.width, frame.height)
                            .map_err(EngineError::from);
                        if let Err(e) = &result {
                            tracing::warn!(sequence = frame.sequence, error = %e, "frame analysis failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(AnalysisHandle { tx })
}
