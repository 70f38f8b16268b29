pub mod buffer;
pub mod position;
pub mod spawn;

pub use buffer::{PREDICTION_BUFFER_SIZE, PredictionBuffer, RemoteTransform};
pub use position::PositionPrediction;
pub use spawn::{PendingDespawn, SpawnPrediction};
