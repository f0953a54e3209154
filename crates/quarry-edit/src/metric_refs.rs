//! Extraction of embedded metric references from report content.
//!
//! Reports embed metrics as `<metric metricId="…" />` tags. After a commit
//! the engine re-derives the set of referenced metrics and upserts the
//! report→metric association table so downstream consumers (dashboards,
//! caches) know what a report currently depends on.

use regex::Regex;
use std::sync::OnceLock;

fn metric_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<metric\s+metricId="([0-9a-fA-F-]{36})""#).expect("valid metric tag pattern")
    })
}

/// All metric ids referenced in `content`, deduplicated, in first-seen order.
pub fn extract_metric_ids(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for captures in metric_tag_pattern().captures_iter(content) {
        let id = captures[1].to_lowercase();
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

pub fn contains_metrics(content: &str) -> bool {
    metric_tag_pattern().is_match(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ids_in_first_seen_order() {
        let content = r#"
# Sales
<metric metricId="24db2cc8-79b0-488f-bd45-8b5412d1bf08" />
Some prose.
<metric metricId="ea6b0583-e9cb-5b2f-a18c-69571042ee67" />
"#;
        assert_eq!(
            extract_metric_ids(content),
            vec![
                "24db2cc8-79b0-488f-bd45-8b5412d1bf08",
                "ea6b0583-e9cb-5b2f-a18c-69571042ee67"
            ]
        );
    }

    #[test]
    fn duplicates_collapse() {
        let content = r#"<metric metricId="24db2cc8-79b0-488f-bd45-8b5412d1bf08" />
<metric metricId="24DB2CC8-79B0-488F-BD45-8B5412D1BF08" />"#;
        assert_eq!(extract_metric_ids(content).len(), 1);
    }

    #[test]
    fn plain_prose_has_no_metrics() {
        assert!(!contains_metrics("# Report without charts"));
        assert!(extract_metric_ids("metricId=\"not-a-tag\"").is_empty());
    }
}
