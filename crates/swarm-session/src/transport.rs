use async_trait::async_trait;
use futures_util::{future, Stream, StreamExt};
use std::pin::Pin;
use swarm_core::{decode_snapshot, AggregateSnapshot, SnapshotError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("push channel connect failed: {0}")]
    Connect(String),
    #[error("push channel receive failed: {0}")]
    Receive(String),
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] SnapshotError),
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Anything that can open a push channel yielding raw text frames.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn connect(&self) -> Result<FrameStream, TransportError>;
}

#[derive(Debug, Clone)]
pub struct WsSnapshotSource {
    url: Url,
}

impl WsSnapshotSource {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl SnapshotSource for WsSnapshotSource {
    async fn connect(&self) -> Result<FrameStream, TransportError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let url = self.url.clone();
        let frames = ws
            .take_while(move |message| {
                let open = !matches!(message, Ok(Message::Close(_)));
                if !open {
                    debug!(event = "push_close_frame", url = %url);
                }
                future::ready(open)
            })
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(err) => Some(Err(TransportError::Receive(err.to_string()))),
                }
            });
        Ok(Box::pin(frames))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Snapshot {
        generation: u64,
        snapshot: AggregateSnapshot,
    },
    Failed {
        generation: u64,
        error: TransportError,
    },
    Closed {
        generation: u64,
    },
}

impl TransportEvent {
    pub fn generation(&self) -> u64 {
        match self {
            TransportEvent::Snapshot { generation, .. }
            | TransportEvent::Failed { generation, .. }
            | TransportEvent::Closed { generation } => *generation,
        }
    }
}

/// One open push channel. Frames are decoded on a reader task and forwarded as
/// [`TransportEvent`]s tagged with this transport's generation.
pub struct Transport {
    generation: u64,
    reader: Option<JoinHandle<()>>,
}

impl Transport {
    pub async fn open<S>(
        source: &S,
        generation: u64,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError>
    where
        S: SnapshotSource + ?Sized,
    {
        let frames = source.connect().await?;
        let reader = tokio::spawn(read_frames(frames, generation, events));
        info!(event = "transport_open", generation);
        Ok(Self {
            generation,
            reader: Some(reader),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Stops the reader task. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            info!(event = "transport_close", generation = self.generation);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_frames(
    mut frames: FrameStream,
    generation: u64,
    events: mpsc::Sender<TransportEvent>,
) {
    while let Some(frame) = frames.next().await {
        let decoded = frame.and_then(|text| decode_snapshot(&text).map_err(TransportError::from));
        let event = match decoded {
            Ok(snapshot) => TransportEvent::Snapshot {
                generation,
                snapshot,
            },
            Err(error) => {
                warn!(event = "transport_failed", generation, error = %error);
                let _ = events.send(TransportEvent::Failed { generation, error }).await;
                return;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
    let _ = events.send(TransportEvent::Closed { generation }).await;
}
