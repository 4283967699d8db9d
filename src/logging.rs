//! Logging infrastructure for chatrender
//!
//! Logs to ~/.chatrender/logs/ with one file per day.
//!
//! Supports per-task context naming the block or link being processed, so
//! interleaved renders stay readable.

use chrono::Local;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);
static TASK_LOG_CONTEXTS: OnceLock<Mutex<HashMap<String, LogContext>>> = OnceLock::new();

/// What the current task is working on
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct LogContext {
    pub block: Option<String>,
    pub kind: Option<String>,
    pub link: Option<String>,
}

thread_local! {
    static LOG_CONTEXT: RefCell<LogContext> = RefCell::new(LogContext::default());
}

/// Mark the current task as rendering `block` as `kind`
pub fn set_block(block: &str, kind: &str) {
    update_context(|ctx| {
        ctx.block = Some(block.to_string());
        ctx.kind = Some(kind.to_string());
    });
}

/// Mark the current task as resolving `link`
pub fn set_link(link: &str) {
    update_context(|ctx| ctx.link = Some(link.to_string()));
}

fn update_context(update: impl Fn(&mut LogContext)) {
    if with_task_context_mut(&update) {
        return;
    }

    LOG_CONTEXT.with(|c| update(&mut c.borrow_mut()));
}

/// Clear the logging context for the current task or thread
pub fn clear_context() {
    if let Some(task_id) = current_task_id() {
        if let Some(store) = TASK_LOG_CONTEXTS.get() {
            if let Ok(mut contexts) = store.lock() {
                contexts.remove(&task_id);
            }
        }
    }

    LOG_CONTEXT.with(|c| {
        *c.borrow_mut() = LogContext::default();
    });
}

fn context_prefix() -> String {
    if let Some(task_ctx) = task_context_snapshot() {
        return context_prefix_for(&task_ctx);
    }

    LOG_CONTEXT.with(|c| context_prefix_for(&c.borrow()))
}

fn current_task_id() -> Option<String> {
    tokio::task::try_id().map(|id| id.to_string())
}

fn with_task_context_mut(update: &impl Fn(&mut LogContext)) -> bool {
    let Some(task_id) = current_task_id() else {
        return false;
    };

    let store = TASK_LOG_CONTEXTS.get_or_init(|| Mutex::new(HashMap::new()));
    if let Ok(mut contexts) = store.lock() {
        update(contexts.entry(task_id).or_default());
        true
    } else {
        false
    }
}

fn task_context_snapshot() -> Option<LogContext> {
    let task_id = current_task_id()?;
    let store = TASK_LOG_CONTEXTS.get()?;
    let contexts = store.lock().ok()?;
    contexts.get(&task_id).cloned()
}

fn context_prefix_for(ctx: &LogContext) -> String {
    let mut parts = Vec::new();

    if let Some(ref block) = ctx.block {
        parts.push(format!("blk:{}", block));
    }
    if let Some(ref kind) = ctx.kind {
        parts.push(format!("kind:{}", kind));
    }
    if let Some(ref link) = ctx.link {
        parts.push(format!("lnk:{}", link));
    }

    if parts.is_empty() {
        String::new()
    } else {
        format!("[{}] ", parts.join("|"))
    }
}

pub struct Logger {
    file: File,
    path: PathBuf,
    trace: bool,
}

impl Logger {
    fn new(trace: bool) -> Option<Self> {
        let log_dir = log_dir()?;
        fs::create_dir_all(&log_dir).ok()?;

        let date = Local::now().format("%Y-%m-%d");
        let path = log_dir.join(format!("chatrender-{}.log", date));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;

        Some(Self { file, path, trace })
    }

    fn write(&mut self, level: &str, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let ctx = context_prefix();
        let line = format!("[{}] [{}] {}{}\n", timestamp, level, ctx, message);
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.flush();
    }
}

fn log_dir() -> Option<PathBuf> {
    crate::config::chatrender_dir().ok().map(|d| d.join("logs"))
}

/// Initialize the logger (call once at startup)
pub fn init(trace: bool) {
    if let Ok(mut guard) = LOGGER.lock() {
        if guard.is_none() {
            *guard = Logger::new(trace);
        }
    }
}

fn write(level: &str, message: &str) {
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut() {
            logger.write(level, message);
        }
    }
}

/// Log an info message
pub fn info(message: &str) {
    write("INFO", message);
}

/// Log an error message
pub fn error(message: &str) {
    write("ERROR", message);
}

/// Log a warning message
pub fn warn(message: &str) {
    write("WARN", message);
}

/// Log a debug message (only with `logging.trace` or CHATRENDER_TRACE)
pub fn debug(message: &str) {
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut().filter(|l| l.trace) {
            logger.write("DEBUG", message);
        }
    }
}

/// Log a finished outbound request
pub fn request(method: &str, url: &str, outcome: &str) {
    write(
        "HTTP",
        &format!("{} {} -> {}", method, truncate(url, 200), truncate(outcome, 300)),
    );
}

/// Get path to the active log file
pub fn log_path() -> Option<PathBuf> {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            return Some(logger.path.clone());
        }
    }
    let date = Local::now().format("%Y-%m-%d");
    Some(log_dir()?.join(format!("chatrender-{}.log", date)))
}

/// Clean up old logs (keep last 7 days)
pub fn cleanup_old_logs() {
    let Some(log_dir) = log_dir() else {
        return;
    };
    let Ok(entries) = fs::read_dir(&log_dir) else {
        return;
    };
    let cutoff = Local::now() - chrono::Duration::days(7);
    for entry in entries.flatten() {
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            let modified: chrono::DateTime<Local> = modified.into();
            if modified < cutoff {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    let head = crate::util::truncate_str(s, max_len);
    if head.len() < s.len() {
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_prefix() {
        let ctx = LogContext {
            block: Some("n12".to_string()),
            kind: Some("diagram".to_string()),
            link: None,
        };
        assert_eq!(context_prefix_for(&ctx), "[blk:n12|kind:diagram] ");
        assert_eq!(context_prefix_for(&LogContext::default()), "");
    }

    #[test]
    fn test_thread_context_set_and_clear() {
        set_link("n3");
        assert_eq!(context_prefix(), "[lnk:n3] ");
        clear_context();
        assert_eq!(context_prefix(), "");
    }

    #[tokio::test]
    async fn test_task_context_is_isolated() {
        let handle = tokio::spawn(async {
            set_block("n7", "document");
            let prefix = context_prefix();
            clear_context();
            prefix
        });
        assert_eq!(handle.await.unwrap(), "[blk:n7|kind:document] ");
    }

    #[test]
    fn test_truncate_marks_cut() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
