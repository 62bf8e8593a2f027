//! Scripted collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::LookupError;
use crate::ports::Fetcher;

#[derive(Clone)]
enum Reply {
    Body(Vec<u8>),
    NotFound,
    Timeout,
    Transport(String),
}

#[derive(Clone)]
struct Script {
    reply: Reply,
    delay: Duration,
}

/// Answers GETs from a fixed table; unknown URLs are 404s.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(self, url: &str, body: serde_json::Value) -> Self {
        self.reply(url, Reply::Body(body.to_string().into_bytes()), Duration::ZERO)
    }

    pub fn json_after(self, url: &str, body: serde_json::Value, delay: Duration) -> Self {
        self.reply(url, Reply::Body(body.to_string().into_bytes()), delay)
    }

    pub fn bytes(self, url: &str, body: &[u8]) -> Self {
        self.reply(url, Reply::Body(body.to_vec()), Duration::ZERO)
    }

    pub fn not_found(self, url: &str) -> Self {
        self.reply(url, Reply::NotFound, Duration::ZERO)
    }

    pub fn timeout(self, url: &str) -> Self {
        self.reply(url, Reply::Timeout, Duration::ZERO)
    }

    pub fn failing(self, url: &str, message: &str) -> Self {
        self.reply(url, Reply::Transport(message.to_string()), Duration::ZERO)
    }

    fn reply(mut self, url: &str, reply: Reply, delay: Duration) -> Self {
        self.scripts.insert(url.to_string(), Script { reply, delay });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn get(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, LookupError> {
        self.calls.lock().unwrap().push(url.to_string());
        let Some(script) = self.scripts.get(url).cloned() else {
            return Err(LookupError::NotFound { url: url.to_string() });
        };
        if !script.delay.is_zero() {
            std::thread::sleep(script.delay);
        }
        match script.reply {
            Reply::Body(b) => Ok(b),
            Reply::NotFound => Err(LookupError::NotFound { url: url.to_string() }),
            Reply::Timeout => Err(LookupError::Timeout { url: url.to_string() }),
            Reply::Transport(message) => Err(LookupError::Transport {
                url: url.to_string(),
                message,
            }),
        }
    }
}

/// A complete, well-formed detail document.
pub fn orwell_detail() -> serde_json::Value {
    serde_json::json!({
        "asin": "B002V19RO6",
        "title": "1984",
        "authors": [{ "asin": "B000AQ0842", "name": "George Orwell" }],
        "narrators": [{ "name": "Simon Prebble" }],
        "seriesPrimary": null,
        "rating": "4.5",
        "summary": "<p>Winston Smith toes the Party line.</p>",
        "image": "https://m.media-amazon.com/images/I/1984.jpg",
        "genres": [
            { "asin": "18580606011", "name": "Science Fiction & Fantasy", "type": "genre" },
            { "asin": "18580628011", "name": "Science Fiction", "type": "tag" }
        ],
        "publisherName": "Blackstone Audio, Inc.",
        "releaseDate": "2007-05-01T00:00:00.000Z",
        "language": "english",
        "isbn": "9781433205316"
    })
}
