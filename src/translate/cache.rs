//! Translation of the recognized sentence through an external service.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

/// Target language code for Hindi in Devanagari.
pub const HINDI: &str = "hi";
/// Target language code for romanized Hindi.
pub const ROMAN_HINDI: &str = "hi-rom";

/// Translation service. Source language is always English.
pub trait Translator: Send + Sync {
    fn name(&self) -> &'static str;
    fn translate(&self, text: &str, target: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translations {
    pub hindi: String,
    pub roman_hindi: String,
    pub english: String,
}

/// Memoizes translations per (target, sentence).
///
/// The sentence only changes when a word is formed, so most frames hit the
/// cache. A failed call falls back to the source text and is not cached.
pub struct TranslationCache {
    translator: Arc<dyn Translator>,
    entries: Mutex<HashMap<(&'static str, String), String>>,
    capacity: usize,
}

impl TranslationCache {
    pub fn new(translator: Arc<dyn Translator>, capacity: usize) -> Self {
        Self { translator, entries: Mutex::new(HashMap::new()), capacity: capacity.max(1) }
    }

    pub fn translate_sentence(&self, sentence: &str) -> Translations {
        Translations {
            hindi: self.lookup(sentence, HINDI),
            roman_hindi: self.lookup(sentence, ROMAN_HINDI),
            english: sentence.to_string(),
        }
    }

    fn lookup(&self, sentence: &str, target: &'static str) -> String {
        let key = (target, sentence.to_string());
        if let Some(hit) = self.entries.lock().get(&key) {
            return hit.clone();
        }

        match self.translator.translate(sentence, target) {
            Ok(translated) => {
                debug!("Translated to {} via {}", target, self.translator.name());
                let mut entries = self.entries.lock();
                if entries.len() >= self.capacity {
                    entries.clear();
                }
                entries.insert(key, translated.clone());
                translated
            }
            Err(e) => {
                warn!("Translation to {} failed: {}", target, e);
                sentence.to_string()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    impl Translator for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn translate(&self, text: &str, target: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}:{}", target, text.to_lowercase()))
        }
    }

    struct Offline;

    impl Translator for Offline {
        fn name(&self) -> &'static str {
            "offline"
        }

        fn translate(&self, _text: &str, _target: &str) -> Result<String> {
            anyhow::bail!("service unreachable")
        }
    }

    #[test]
    fn test_repeated_sentence_hits_cache() {
        let translator = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let cache = TranslationCache::new(translator.clone(), 16);

        let first = cache.translate_sentence("HELLO FRIEND");
        let second = cache.translate_sentence("HELLO FRIEND");
        assert_eq!(first, second);
        assert_eq!(first.hindi, "hi:hello friend");
        assert_eq!(first.roman_hindi, "hi-rom:hello friend");
        assert_eq!(first.english, "HELLO FRIEND");
        assert_eq!(translator.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_falls_back_to_source() {
        let cache = TranslationCache::new(Arc::new(Offline), 16);
        let t = cache.translate_sentence("THANK YOU");
        assert_eq!(t.hindi, "THANK YOU");
        assert_eq!(t.roman_hindi, "THANK YOU");
        assert!(cache.is_empty());
    }
}
