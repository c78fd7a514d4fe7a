use thiserror::Error;
use trellis_graph::GraphError;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("graph coordinator channel closed")]
  ChannelClosed,

  #[error(transparent)]
  Graph(#[from] GraphError),
}
