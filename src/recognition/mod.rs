pub mod activation;
pub mod orchestrator;
pub mod result;
pub mod session;
pub mod stabilizer;

pub use activation::{ActivationMachine, RecognitionState};
pub use orchestrator::{Recognizer, Session};
pub use result::{ModelInfo, PredictionRecord, RecognitionResult, TextState, TextUpdate, WarningLevel};
pub use session::{SessionRegistry, SessionState};
pub use stabilizer::{StabilizedPrediction, Stabilizer};
