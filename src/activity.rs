use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Mutex;

const MAX_LOG_LINES: usize = 50;

#[derive(Debug, Clone, Copy)]
pub enum Kind {
    Info,
    Http,
    Stream,
    Auth,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub text: String,
    pub kind: Kind,
}

static ACTIVITY_LOG: Lazy<Mutex<VecDeque<Entry>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES)));

pub fn log<T: Into<String>>(line: T) {
    log_with(Kind::Info, line);
}

pub fn log_with<T: Into<String>>(kind: Kind, line: T) {
    if let Ok(mut buf) = ACTIVITY_LOG.lock() {
        let s = line.into();
        if std::env::var("RESEARCH_GPT_DEBUG").is_ok() {
            eprintln!("[{:?}] {}", kind, s);
        }
        if buf.len() >= MAX_LOG_LINES { buf.pop_front(); }
        buf.push_back(Entry { text: s, kind });
    }
}

pub fn recent(n: usize) -> Vec<Entry> {
    if let Ok(buf) = ACTIVITY_LOG.lock() {
        let len = buf.len();
        let take = n.min(len);
        buf.iter().skip(len - take).cloned().collect()
    } else {
        Vec::new()
    }
}

#[allow(dead_code)]
pub fn clear() {
    if let Ok(mut buf) = ACTIVITY_LOG.lock() {
        buf.clear();
    }
}
