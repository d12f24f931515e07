//! Task manager — rule-based task capture from user messages.
//!
//! Recognised phrasings (case-insensitive): "remind me to", "I need to",
//! "don't let me forget to", "todo:", "task:". The description runs to the
//! next `.` or the end of the line. A trailing due phrase such as
//! "by friday", "by 3rd of may" or "by 12/05" is moved into `due`.

use std::sync::Arc;

use buddy_core::error::StoreError;
use buddy_core::{ConversationStore, NewTask, Task, TaskFilter, TaskStatus};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::{debug, info, warn};

const TASK_PATTERNS: &[&str] = &[
    r"(?im)remind me to (.+?)(?:\.|$)",
    r"(?im)\bI need to (.+?)(?:\.|$)",
    r"(?im)don't let me forget to (.+?)(?:\.|$)",
    r"(?im)\btodo:\s*(.+?)(?:\.|$)",
    r"(?im)\btask:\s*(.+?)(?:\.|$)",
];

const DUE_PATTERNS: &[&str] = &[
    r"(?i)\bby (tomorrow|today|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
    concat!(
        r"(?i)\bby (\d{1,2}(?:st|nd|rd|th)?(?:\s+of)?\s+",
        r"(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*)\b",
    ),
    r"(?i)\bby (\d{1,2}/\d{1,2}(?:/\d{2,4})?)\b",
];

static TASK_RES: Lazy<Vec<Regex>> = Lazy::new(|| compile(TASK_PATTERNS));
static DUE_RES: Lazy<Vec<Regex>> = Lazy::new(|| compile(DUE_PATTERNS));

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Skipping task pattern that does not compile");
                None
            }
        })
        .collect()
}

/// Find task requests in `text`, in pattern order. Identical
/// descriptions are reported once.
pub fn extract_tasks(text: &str) -> Vec<NewTask> {
    let mut tasks: Vec<NewTask> = Vec::new();

    for re in TASK_RES.iter() {
        for caps in re.captures_iter(text) {
            let Some(raw) = caps.get(1) else { continue };
            let (description, due) = split_due(raw.as_str().trim());
            let has_words = description.chars().any(char::is_alphanumeric);
            if !has_words || tasks.iter().any(|t| t.description == description) {
                continue;
            }
            tasks.push(NewTask { description, due });
        }
    }

    debug!(found = tasks.len(), "Task extraction");
    tasks
}

/// Pull the first due phrase out of a description.
fn split_due(description: &str) -> (String, Option<String>) {
    for re in DUE_RES.iter() {
        if let Some(caps) = re.captures(description) {
            let (Some(whole), Some(date)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let rest = format!(
                "{} {}",
                &description[..whole.start()],
                &description[whole.end()..]
            );
            return (collapse_whitespace(&rest), Some(date.as_str().to_string()));
        }
    }
    (collapse_whitespace(description), None)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct TaskManager {
    store: Arc<dyn ConversationStore>,
}

impl TaskManager {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Extract tasks from `text` and store each one for `user_id`.
    pub async fn record(&self, user_id: &str, text: &str) -> Result<Vec<Task>, StoreError> {
        let mut stored = Vec::new();
        for task in extract_tasks(text) {
            let task = self.store.append_task(user_id, task).await?;
            info!(task_id = task.id, user_id, due = ?task.due, "Task recorded");
            stored.push(task);
        }
        Ok(stored)
    }

    pub async fn list(&self, user_id: &str, filter: TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.store.fetch_tasks(user_id, filter).await
    }

    pub async fn pending(&self, user_id: &str, limit: usize) -> Result<Vec<Task>, StoreError> {
        self.list(user_id, TaskFilter::pending(limit)).await
    }

    /// Returns false if no task has that id.
    pub async fn set_status(&self, task_id: i64, status: TaskStatus) -> Result<bool, StoreError> {
        let updated = self.store.update_task_status(task_id, status).await?;
        if updated {
            info!(task_id, status = %status, "Task status updated");
        } else {
            warn!(task_id, "No task to update");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddy_memory::InMemoryStore;

    fn described(tasks: &[NewTask]) -> Vec<(&str, Option<&str>)> {
        tasks
            .iter()
            .map(|t| (t.description.as_str(), t.due.as_deref()))
            .collect()
    }

    #[test]
    fn each_phrasing_is_recognised() {
        assert_eq!(
            described(&extract_tasks("Remind me to water the plants.")),
            vec![("water the plants", None)]
        );
        assert_eq!(
            described(&extract_tasks("i need to renew my passport")),
            vec![("renew my passport", None)]
        );
        assert_eq!(
            described(&extract_tasks("Don't let me forget to call grandma. Thanks!")),
            vec![("call grandma", None)]
        );
        assert_eq!(described(&extract_tasks("TODO: fix the bike")), vec![("fix the bike", None)]);
        assert_eq!(described(&extract_tasks("task:book flights")), vec![("book flights", None)]);
    }

    #[test]
    fn plain_chat_has_no_tasks() {
        assert!(extract_tasks("What's the weather like?").is_empty());
        assert!(extract_tasks("").is_empty());
        assert!(extract_tasks("remind me to .").is_empty());
    }

    #[test]
    fn weekday_due_is_split_out() {
        let tasks = extract_tasks("Remind me to submit the report by Friday.");
        assert_eq!(described(&tasks), vec![("submit the report", Some("Friday"))]);
    }

    #[test]
    fn day_of_month_due_is_split_out() {
        let tasks = extract_tasks("I need to pay rent by 3rd of May");
        assert_eq!(described(&tasks), vec![("pay rent", Some("3rd of May"))]);

        let tasks = extract_tasks("todo: send invoice by 12 march");
        assert_eq!(described(&tasks), vec![("send invoice", Some("12 march"))]);
    }

    #[test]
    fn numeric_due_is_split_out() {
        let tasks = extract_tasks("remind me to renew insurance by 12/05/2025");
        assert_eq!(described(&tasks), vec![("renew insurance", Some("12/05/2025"))]);
    }

    #[test]
    fn due_in_the_middle_keeps_the_rest() {
        let tasks = extract_tasks("remind me to by tomorrow pick up the cake");
        assert_eq!(described(&tasks), vec![("pick up the cake", Some("tomorrow"))]);
    }

    #[test]
    fn several_tasks_in_one_message() {
        let tasks =
            extract_tasks("Remind me to call mom. Also I need to buy milk.\ntodo: clean desk");
        assert_eq!(
            described(&tasks),
            vec![("call mom", None), ("buy milk", None), ("clean desk", None)]
        );
    }

    #[test]
    fn duplicates_are_reported_once() {
        let tasks = extract_tasks("Remind me to stretch. remind me to stretch.");
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn record_list_and_complete() {
        let store = Arc::new(InMemoryStore::new());
        let tm = TaskManager::new(store);

        let stored = tm
            .record("alice", "Remind me to call the bank by monday. I need to walk the dog.")
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].due.as_deref(), Some("monday"));
        assert!(stored.iter().all(|t| t.status == TaskStatus::Pending));

        assert_eq!(tm.pending("alice", 10).await.unwrap().len(), 2);
        assert!(tm.pending("bob", 10).await.unwrap().is_empty());

        assert!(tm.set_status(stored[0].id, TaskStatus::Completed).await.unwrap());
        let pending = tm.pending("alice", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].description, "walk the dog");

        let all = tm.list("alice", TaskFilter::all(10)).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn unknown_task_id_reports_false() {
        let tm = TaskManager::new(Arc::new(InMemoryStore::new()));
        assert!(!tm.set_status(999, TaskStatus::Cancelled).await.unwrap());
    }
}
