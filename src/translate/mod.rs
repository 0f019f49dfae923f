mod cache;

pub use cache::{HINDI, ROMAN_HINDI, TranslationCache, Translations, Translator};
