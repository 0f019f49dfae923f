pub mod classifier;
pub mod network;
pub mod slot;

pub use classifier::{CLASSES, GestureClassifier, LetterClassifier, NUM_CLASSES, RawPrediction, class_index, top_prediction};
pub use slot::ModelSlot;
