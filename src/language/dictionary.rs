//! Word list used for spelling correction and suggestions.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Frequent English words.
const COMMON_WORDS: &[&str] = &[
    "THE", "AND", "FOR", "ARE", "BUT", "NOT", "YOU", "ALL", "CAN", "HER", "WAS", "ONE", "OUR", "HAD", "BY", "WORD", "WHAT", "SAID", "EACH",
    "WHICH", "SHE", "DO", "HOW", "THEIR", "IF", "WILL", "UP", "OTHER", "ABOUT", "OUT", "MANY", "THEN", "THEM", "THESE", "SO", "SOME", "WOULD",
    "MAKE", "LIKE", "INTO", "HIM", "HAS", "TWO", "MORE", "GO", "NO", "WAY", "COULD", "MY", "THAN", "FIRST", "BEEN", "CALL", "WHO", "ITS",
    "NOW", "FIND", "LONG", "DOWN", "DAY", "DID", "GET", "COME", "MADE", "MAY", "PART", "OVER", "NEW", "SOUND", "TAKE", "ONLY", "LITTLE",
    "WORK", "KNOW", "PLACE", "YEAR", "LIVE", "ME", "BACK", "GIVE", "MOST", "VERY", "AFTER", "THING", "JUST", "NAME", "GOOD", "SENTENCE",
    "MAN", "THINK", "SAY", "GREAT", "WHERE", "HELP", "THROUGH", "MUCH", "BEFORE", "LINE", "RIGHT", "TOO", "MEAN", "OLD", "ANY", "SAME",
    "TELL", "BOY", "FOLLOW", "CAME", "WANT", "SHOW", "ALSO", "AROUND", "FORM", "THREE", "SMALL", "SET", "PUT", "END", "WHY", "AGAIN",
    "TURN", "HERE", "OFF", "WENT", "NUMBER", "MEN", "EVERY", "FOUND", "STILL", "BETWEEN", "MANE", "SHOULD", "HOME", "BIG", "AIR", "OWN",
    "UNDER", "READ", "LAST", "NEVER", "US", "LEFT", "ALONG", "WHILE", "MIGHT", "NEXT", "BELOW", "SAW", "SOMETHING", "THOUGHT", "BOTH",
    "FEW", "THOSE", "ALWAYS", "LOOKED", "LARGE", "OFTEN", "TOGETHER", "ASKED", "HOUSE", "DONT", "WORLD", "GOING", "SCHOOL", "IMPORTANT",
    "UNTIL", "FOOD", "KEEP", "CHILDREN", "FEET", "LAND", "SIDE", "WITHOUT", "ONCE", "ANIMAL", "LIFE", "ENOUGH", "TOOK", "SOMETIMES", "FOUR",
    "HEAD", "ABOVE", "KIND", "BEGAN", "ALMOST", "PAGE", "GOT", "EARTH", "NEED", "FAR", "HAND", "HIGH", "MOTHER", "LIGHT", "COUNTRY",
    "FATHER", "LET", "NIGHT", "PICTURE", "BEING", "STUDY", "SECOND", "SOON", "STORY", "SINCE", "WHITE", "EVER", "PAPER", "HARD", "NEAR",
    "BETTER", "BEST", "ACROSS", "DURING", "TODAY", "HOWEVER", "SURE", "KNEW", "TRYING", "TOLD", "YOUNG", "SUN", "WHOLE", "HEAR", "EXAMPLE",
    "HEARD", "SEVERAL", "CHANGE", "ANSWER", "ROOM", "SEA", "AGAINST", "TOP", "TURNED", "LEARN", "POINT", "CITY", "PLAY", "TOWARD", "FIVE",
    "HIMSELF", "USUALLY", "MONEY", "SEEN", "DIDNT", "CAR", "MORNING", "IM", "BODY", "UPON", "FAMILY", "LATER", "MOVE", "FACE", "DOOR",
    "CUT", "DONE", "GROUP", "TRUE", "LEAVE", "YOURE", "IDEA", "FISH", "MOUNTAIN", "NORTH", "BASE", "HORSE", "MAIN", "SEEMS", "OPEN",
    "BEGIN", "RUN", "MILE", "WALK", "RIVER", "CARRY", "STATE", "BOOK", "STOP", "MISS", "EAT", "WATCH", "INDIAN", "REAL", "GIRL", "TALK",
    "LIST", "SONG",
];

/// Greetings and everyday words common in finger-spelled conversation.
const CONVERSATION_WORDS: &[&str] = &[
    "HELLO", "HI", "BYE", "GOODBYE", "THANK", "THANKS", "PLEASE", "SORRY", "YES", "WELCOME", "NAMASTE", "FRIEND", "LOVE", "WATER", "SIGN",
    "LANGUAGE", "DEAF", "INDIA", "NICE", "MEET",
];

/// Uppercase word set, iterated in sorted order.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    words: BTreeSet<String>,
}

impl Dictionary {
    /// The built-in word list.
    pub fn builtin() -> Self {
        let mut dict = Self::default();
        dict.extend(COMMON_WORDS.iter().chain(CONVERSATION_WORDS));
        dict
    }

    /// The built-in list plus words from a file, one per line. Blank lines and
    /// lines starting with `#` are skipped.
    pub fn with_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read dictionary {}", path.display()))?;

        let mut dict = Self::builtin();
        let before = dict.len();
        dict.extend(raw.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#')));
        info!("📖 Loaded {} extra dictionary words from {}", dict.len() - before, path.display());
        Ok(dict)
    }

    /// Add words, normalized to uppercase alphanumerics. Empty results are ignored.
    pub fn extend<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            let normalized: String = word.as_ref().chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_uppercase()).collect();
            if !normalized.is_empty() {
                self.words.insert(normalized);
            }
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    /// Entries starting with `prefix`, shortest first, then alphabetical.
    pub fn with_prefix(&self, prefix: &str) -> Vec<&str> {
        let mut matches: Vec<&str> = self.iter().filter(|w| w.starts_with(prefix)).collect();
        matches.sort_by_key(|w| w.len());
        matches
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
