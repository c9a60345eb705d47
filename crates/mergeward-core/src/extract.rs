//! Reference extraction: pull change-request URLs out of ticket notes.

use regex::Regex;

use crate::model::TicketId;

/// Finds change-request URLs for one source-control host in free text.
#[derive(Debug, Clone)]
pub struct ReferenceExtractor {
    pattern: Regex,
    exclusions: Vec<String>,
}

impl ReferenceExtractor {
    /// Build an extractor for URLs rooted at `gitlab_base`
    /// (e.g. `http://git.example.com:7070`).
    pub fn new(gitlab_base: &str) -> Self {
        let base = regex::escape(gitlab_base.trim_end_matches('/'));
        let pattern = Regex::new(&format!(r"{base}/\S*?/merge_requests/\d+"))
            .expect("escaped base always forms a valid pattern");
        Self {
            pattern,
            exclusions: Vec::new(),
        }
    }

    /// Drop any URL containing one of `patterns` (automation-generated links).
    pub fn with_exclusions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = patterns
            .into_iter()
            .map(Into::<String>::into)
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    /// Distinct URLs referenced across `notes`, in first-seen order.
    pub fn extract<S: AsRef<str>>(&self, notes: &[S]) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for note in notes {
            for m in self.pattern.find_iter(note.as_ref()) {
                let url = m.as_str();
                if self.is_excluded(url) || found.iter().any(|u| u == url) {
                    continue;
                }
                found.push(url.to_string());
            }
        }
        found
    }

    fn is_excluded(&self, url: &str) -> bool {
        self.exclusions.iter().any(|p| url.contains(p.as_str()))
    }
}

/// Parse the `Original Ticket: <b>N</b>` marker that cloned tickets carry in
/// their description.
pub fn original_ticket_ref(description: &str) -> Option<TicketId> {
    let re = Regex::new(r"Original Ticket: #?<b>#?(\d+)</b>").expect("static pattern");
    re.captures(description)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://git.example.com:7070";

    #[test]
    fn extracts_in_first_seen_order_without_duplicates() {
        let ex = ReferenceExtractor::new(BASE);
        let notes = [
            "Fix in http://git.example.com:7070/team/NS61x/merge_requests/12 please review",
            "also http://git.example.com:7070/team/ClubNow/merge_requests/3 and \
             http://git.example.com:7070/team/NS61x/merge_requests/12 again",
        ];
        assert_eq!(
            ex.extract(&notes),
            vec![
                "http://git.example.com:7070/team/NS61x/merge_requests/12",
                "http://git.example.com:7070/team/ClubNow/merge_requests/3",
            ]
        );
    }

    #[test]
    fn empty_notes_yield_nothing() {
        let ex = ReferenceExtractor::new(BASE);
        let notes: [&str; 0] = [];
        assert!(ex.extract(&notes).is_empty());
        assert!(ex.extract(&["no links here"]).is_empty());
    }

    #[test]
    fn other_hosts_are_ignored() {
        let ex = ReferenceExtractor::new(BASE);
        let notes = ["see http://elsewhere.example.com/team/NS61x/merge_requests/9"];
        assert!(ex.extract(&notes).is_empty());
    }

    #[test]
    fn base_is_matched_literally() {
        // '.' in the base must not match arbitrary characters
        let ex = ReferenceExtractor::new(BASE);
        let notes = ["http://gitXexample.com:7070/team/NS61x/merge_requests/9"];
        assert!(ex.extract(&notes).is_empty());
    }

    #[test]
    fn exclusion_patterns_drop_matches() {
        let ex = ReferenceExtractor::new(BASE).with_exclusions(["automation/"]);
        let notes = [
            "http://git.example.com:7070/automation/NS61x/merge_requests/1 \
             http://git.example.com:7070/team/NS61x/merge_requests/2",
        ];
        assert_eq!(
            ex.extract(&notes),
            vec!["http://git.example.com:7070/team/NS61x/merge_requests/2"]
        );
    }

    #[test]
    fn match_does_not_span_whitespace() {
        let ex = ReferenceExtractor::new(BASE);
        let notes = [
            "http://git.example.com:7070/team/NS61x/commit/abc123 fixed by \
             http://git.example.com:7070/team/ClubNow/merge_requests/3",
        ];
        assert_eq!(
            ex.extract(&notes),
            vec!["http://git.example.com:7070/team/ClubNow/merge_requests/3"]
        );
    }

    #[test]
    fn original_ticket_marker_is_parsed() {
        assert_eq!(
            original_ticket_ref("details\n\nOriginal Ticket: <b>4521</b>"),
            Some(4521)
        );
        assert_eq!(original_ticket_ref("Original Ticket: #<b>#77</b>"), Some(77));
        assert_eq!(original_ticket_ref("no marker"), None);
    }
}
