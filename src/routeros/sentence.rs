//! Sentences, replies and tags of the RouterOS API.
//!
//! A sentence is an ordered list of words. Requests start with a command
//! path (`/ip/firewall/address-list/add`), replies start with a marker
//! (`!re`, `!done`, `!trap`, `!fatal`). Attribute words look like
//! `=name=value`; the correlation tag travels as `.tag=value`.
//!
//! ```text
//! request:  /ip/firewall/address-list/add  .tag=1F  =address=1.2.3.4  =list=a_test
//! reply:    !done  .tag=1F  =ret=*2A
//! ```

use std::collections::HashMap;
use std::fmt;

/// Tag of the bulk snapshot job (`getall`).
pub const FETCH_TAG: &str = "FETCH";

/// Tag of the change-stream job (`listen`).
pub const LISTEN_TAG: &str = "LISTEN";

/// One protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    words: Vec<String>,
}

impl Sentence {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Sentence {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.words.join(" "))
    }
}

/// Split a word into `(name, value)`.
///
/// The name ends at the first `=` after position 0, with leading `=`
/// stripped; words without such a `=` have an empty value.
///
/// ```rust
/// use mirror_sync::routeros::sentence::split_word;
///
/// assert_eq!(split_word("=address=1.2.3.4"), ("address", "1.2.3.4"));
/// assert_eq!(split_word(".tag=FETCH"), (".tag", "FETCH"));
/// assert_eq!(split_word("=.id=*1"), (".id", "*1"));
/// assert_eq!(split_word("!done"), ("!done", ""));
/// ```
pub fn split_word(word: &str) -> (&str, &str) {
    let separator = word.char_indices().skip(1).find(|&(_, c)| c == '=');
    match separator {
        Some((pos, _)) => (word[..pos].trim_start_matches('='), &word[pos + 1..]),
        None => (word.trim_start_matches('='), ""),
    }
}

// =============================================================================
// Replies
// =============================================================================

/// The leading word of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `!re`: one data record.
    Re,
    /// `!done`: the command (or job) finished.
    Done,
    /// `!trap`: the command failed.
    Trap,
    /// `!fatal`: the session is about to be closed by the device.
    Fatal,
    /// `!empty` or anything unexpected.
    Other,
}

impl Marker {
    fn from_word(word: &str) -> Self {
        match word {
            "!re" => Marker::Re,
            "!done" => Marker::Done,
            "!trap" => Marker::Trap,
            "!fatal" => Marker::Fatal,
            _ => Marker::Other,
        }
    }
}

/// Which job a tag belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagClass {
    Fetch,
    Listen,
    /// A single add/set/remove request.
    Command(u64),
    Unrecognized,
}

impl TagClass {
    /// Classify a tag value. Command tags are uppercase hex counters.
    pub fn of(tag: &str) -> Self {
        match tag {
            FETCH_TAG => TagClass::Fetch,
            LISTEN_TAG => TagClass::Listen,
            _ => match u64::from_str_radix(tag, 16) {
                Ok(n) if !tag.is_empty() && !tag.starts_with('+') => TagClass::Command(n),
                _ => TagClass::Unrecognized,
            },
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            TagClass::Fetch => "fetch",
            TagClass::Listen => "listen",
            TagClass::Command(_) => "command",
            TagClass::Unrecognized => "unrecognized",
        }
    }
}

/// Render a command counter as a tag.
pub fn command_tag(counter: u64) -> String {
    format!("{counter:X}")
}

/// A parsed reply sentence.
#[derive(Debug, Clone)]
pub struct Reply {
    marker: Marker,
    tag: Option<String>,
    attributes: HashMap<String, String>,
    words: Vec<String>,
}

impl Reply {
    pub fn parse(sentence: &Sentence) -> Self {
        let words = sentence.words();
        let marker = words
            .first()
            .map(|w| Marker::from_word(w))
            .unwrap_or(Marker::Other);

        let mut attributes = HashMap::new();
        for word in words.iter().skip(1) {
            let (name, value) = split_word(word);
            attributes.insert(name.to_string(), value.to_string());
        }
        let tag = attributes.get(".tag").cloned();

        Self {
            marker,
            tag,
            attributes,
            words: words.to_vec(),
        }
    }

    pub fn marker(&self) -> Marker {
        self.marker
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn tag_class(&self) -> Option<TagClass> {
        self.tag.as_deref().map(TagClass::of)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Human-readable error text of a `!trap` or `!fatal` reply.
    pub fn message(&self) -> String {
        if let Some(message) = self.get("message") {
            return message.to_string();
        }
        // `!fatal` carries its reason as a bare word.
        self.words
            .iter()
            .skip(1)
            .find(|w| !w.starts_with('=') && !w.starts_with('.'))
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.words.join(" "))
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Builder for request sentences.
///
/// ```rust
/// use mirror_sync::routeros::sentence::Command;
///
/// let sentence = Command::new("/ip/firewall/address-list/remove")
///     .tag("2A")
///     .attr(".id", "*7")
///     .build();
/// assert_eq!(
///     sentence.words(),
///     ["/ip/firewall/address-list/remove", ".tag=2A", "=.id=*7"]
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Command {
    words: Vec<String>,
}

impl Command {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            words: vec![path.into()],
        }
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.words.push(format!(".tag={tag}"));
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.words.push(format!("={name}={value}"));
        self
    }

    /// Add an attribute only when `value` is present.
    pub fn attr_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    pub fn build(self) -> Sentence {
        Sentence::new(self.words)
    }
}
