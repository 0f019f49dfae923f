pub mod correction;
pub mod dictionary;
pub mod similarity;
pub mod words;

pub use correction::{Correction, CorrectionSource, Corrector};
pub use dictionary::Dictionary;
pub use words::{FormedWord, SpellCheck, WordFormationEngine};
