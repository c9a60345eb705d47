//! Run summary: bucket outcomes by kind and render the chat message.
//!
//! Buckets come from the run's typed events or, when the run happened in
//! another process, from its log file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use crate::events::RunEvent;
use crate::model::RunCategory;

/// File name prefix of the rolling run logs.
pub const LOG_FILE_PREFIX: &str = "mergeward";

/// URLs grouped by outcome, de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryBuckets {
    /// Tickets seen, keyed by their id as text.
    pub processed_tickets: BTreeSet<String>,
    /// Requests waiting on review, per reviewer.
    pub pending_review: BTreeMap<String, BTreeSet<String>>,
    pub pending_qa: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    /// Merged requests in first-seen order.
    pub merged: Vec<String>,
}

impl SummaryBuckets {
    pub fn from_events(events: &[RunEvent]) -> Self {
        let mut b = Self::default();
        for event in events {
            match event {
                RunEvent::TicketStarted { ticket, .. } => {
                    b.processed_tickets.insert(ticket.to_string());
                }
                RunEvent::ReviewPending { url, reviewer, .. } => {
                    b.add_review(reviewer, url);
                }
                RunEvent::QaPending { url, .. } => {
                    b.pending_qa.insert(url.clone());
                }
                RunEvent::MergeFailed { url, .. } => {
                    b.failed.insert(url.clone());
                }
                RunEvent::Merged { url, .. } => b.add_merged(url),
                _ => {}
            }
        }
        b
    }

    /// Rebuild buckets from log text. With `category` set, only lines
    /// written inside that category's `run` span are considered.
    pub fn from_log(text: &str, category: Option<&RunCategory>) -> Self {
        let p = LogPatterns::new();
        let mut b = Self::default();
        for line in text.lines() {
            if let Some(cat) = category {
                if !in_category_span(line, cat) {
                    continue;
                }
            }
            if let Some(c) = p.review.captures(line) {
                b.add_review(c[1].trim(), &c[2]);
            } else if let Some(c) = p.qa.captures(line) {
                b.pending_qa.insert(c[1].to_string());
            } else if let Some(c) = p.merged.captures(line) {
                b.add_merged(&c[1]);
            } else if let Some(c) = p.failed.captures(line) {
                b.failed.insert(c[1].to_string());
            } else if let Some(c) = p.ticket.captures(line) {
                let id = c[1].rsplit('=').next().unwrap_or(&c[1]);
                b.processed_tickets.insert(id.to_string());
            }
        }
        b
    }

    fn add_review(&mut self, reviewer: &str, url: &str) {
        self.pending_review
            .entry(reviewer.to_string())
            .or_default()
            .insert(url.to_string());
    }

    fn add_merged(&mut self, url: &str) {
        if !self.merged.iter().any(|u| u == url) {
            self.merged.push(url.to_string());
        }
    }

    pub fn review_queue_len(&self) -> usize {
        self.pending_review.values().map(BTreeSet::len).sum()
    }

    /// Render the chat message for `category`.
    pub fn render(&self, category: &RunCategory) -> String {
        let mut lines = vec![
            format!("*🛠️ {} Merge Summary*", category.display_title()),
            String::new(),
            format!("> 📦 Total Tickets Processed: {}", self.processed_tickets.len()),
            format!("> 🧪 QA Verification Queue: {}", self.pending_qa.len()),
            format!("> 👁️ Code Review Queue: {}", self.review_queue_len()),
            format!("> ✅ MRs Successfully Merged: {}", self.merged.len()),
            String::new(),
        ];

        for (reviewer, urls) in &self.pending_review {
            lines.push(format!("*Code Review pending at {reviewer} for:*"));
            lines.extend(urls.iter().cloned());
            lines.push(String::new());
        }

        if !self.failed.is_empty() {
            lines.push("*❌ Merge Failures:*".to_string());
            lines.extend(self.failed.iter().cloned());
            lines.push(String::new());
        }

        if !self.merged.is_empty() {
            lines.push("*✔️ Successfully Merged MR's*".to_string());
            lines.extend(self.merged.iter().cloned());
        }

        lines.join("\n").trim_end().to_string()
    }
}

struct LogPatterns {
    review: Regex,
    qa: Regex,
    merged: Regex,
    failed: Regex,
    ticket: Regex,
}

impl LogPatterns {
    fn new() -> Self {
        let re = |p: &str| Regex::new(p).expect("static pattern");
        Self {
            review: re(r"Code Review pending at\s+(.*?)\s+for:\s+(http[^\s]+)"),
            qa: re(r"QA Verified label missing in the MR, skipping it for:\s+(http[^\s]+)"),
            merged: re(r"Merge request\s+(http[^\s]+)\s+successfully merged"),
            failed: re(r"Unable to merge MR:\s+(http[^\s]+)"),
            ticket: re(r"Ticket to process:\s+(https?://[^\s]+)"),
        }
    }
}

fn in_category_span(line: &str, category: &RunCategory) -> bool {
    let field = format!("category={category}");
    line.contains(&format!("{field} ")) || line.contains(&format!("{field}}}"))
}

/// Newest log file in `dir` whose name starts with [`LOG_FILE_PREFIX`].
///
/// Rolling file names carry the date suffix, so the lexically greatest name
/// is the newest.
pub fn latest_log_file(dir: &Path) -> Result<PathBuf> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read log dir {:?}", dir))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(LOG_FILE_PREFIX)
        })
        .map(|entry| entry.path())
        .collect();
    names.sort();
    names
        .pop()
        .with_context(|| format!("no {LOG_FILE_PREFIX} log file in {:?}", dir))
}

/// Buckets for `category` rebuilt from the newest log file in `dir`.
pub fn summary_from_log_dir(dir: &Path, category: &RunCategory) -> Result<SummaryBuckets> {
    let path = latest_log_file(dir)?;
    let text = std::fs::read_to_string(&path).with_context(|| format!("read {:?}", path))?;
    Ok(SummaryBuckets::from_log(&text, Some(category)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MR1: &str = "http://git.example.com/team/NS61x/merge_requests/1";
    const MR2: &str = "http://git.example.com/team/NS61x/merge_requests/2";
    const MR3: &str = "http://git.example.com/team/ClubNow/merge_requests/3";

    #[test]
    fn render_groups_and_omits_empty_sections() {
        let events = vec![
            RunEvent::TicketStarted {
                ticket: 10,
                url: "http://t/view.php?id=10".into(),
            },
            RunEvent::ReviewPending {
                ticket: 10,
                url: MR2.into(),
                reviewer: "zoe".into(),
            },
            RunEvent::ReviewPending {
                ticket: 10,
                url: MR1.into(),
                reviewer: "adam".into(),
            },
            RunEvent::Merged {
                ticket: 10,
                url: MR3.into(),
            },
        ];
        let msg = SummaryBuckets::from_events(&events).render(&RunCategory::new("regression"));
        let expected = format!(
            "*🛠️ Regression Merge Summary*\n\n\
             > 📦 Total Tickets Processed: 1\n\
             > 🧪 QA Verification Queue: 0\n\
             > 👁️ Code Review Queue: 2\n\
             > ✅ MRs Successfully Merged: 1\n\n\
             *Code Review pending at adam for:*\n{MR1}\n\n\
             *Code Review pending at zoe for:*\n{MR2}\n\n\
             *✔️ Successfully Merged MR's*\n{MR3}"
        );
        assert_eq!(msg, expected);
        assert!(!msg.contains("Merge Failures"));
    }

    #[test]
    fn duplicate_urls_count_once() {
        let events = vec![
            RunEvent::QaPending {
                ticket: 1,
                url: MR1.into(),
            },
            RunEvent::QaPending {
                ticket: 2,
                url: MR1.into(),
            },
            RunEvent::Merged {
                ticket: 1,
                url: MR2.into(),
            },
            RunEvent::Merged {
                ticket: 2,
                url: MR2.into(),
            },
        ];
        let b = SummaryBuckets::from_events(&events);
        assert_eq!(b.pending_qa.len(), 1);
        assert_eq!(b.merged, vec![MR2.to_string()]);
    }

    #[test]
    fn log_lines_are_filtered_by_category_span() {
        let log = format!(
            "2026-10-19T08:00:00Z  INFO run{{category=regression run_id=a1}}: Ticket to process: http://t/view.php?id=5\n\
             2026-10-19T08:00:01Z  INFO run{{category=regression run_id=a1}}: Code Review pending at Sam Lee for: {MR1}\n\
             2026-10-19T08:00:02Z  INFO run{{category=production_support run_id=b2}}: QA Verified label missing in the MR, skipping it for: {MR2}\n\
             2026-10-19T08:00:03Z  INFO run{{category=regression run_id=a1}}: Unable to merge MR: {MR3} despite trying\n\
             2026-10-19T08:00:04Z  INFO run{{category=regression run_id=a1}}: Merge request {MR2} successfully merged. Ticket ID: http://t/view.php?id=5\n"
        );
        let b = SummaryBuckets::from_log(&log, Some(&RunCategory::new("regression")));
        assert_eq!(b.processed_tickets.iter().collect::<Vec<_>>(), vec!["5"]);
        assert_eq!(b.pending_review["Sam Lee"].len(), 1);
        assert!(b.pending_qa.is_empty());
        assert!(b.failed.contains(MR3));
        assert_eq!(b.merged, vec![MR2.to_string()]);

        let ps = SummaryBuckets::from_log(&log, Some(&RunCategory::new("production_support")));
        assert_eq!(ps.pending_qa.len(), 1);
        assert!(ps.merged.is_empty());
    }

    #[test]
    fn latest_log_file_picks_greatest_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mergeward.2026-10-17"), "old").unwrap();
        std::fs::write(dir.path().join("mergeward.2026-10-18"), "new").unwrap();
        std::fs::write(dir.path().join("other.2026-10-19"), "x").unwrap();
        let latest = latest_log_file(dir.path()).unwrap();
        assert!(latest.ends_with("mergeward.2026-10-18"));
    }

    #[test]
    fn missing_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_log_file(dir.path()).is_err());
    }
}
