use std::collections::HashMap;

pub enum OpKind {
    Queue,
    Results,
}

#[derive(Clone)]
pub enum OpOutcome {
    QueueOk,
    ResultsOk { tag: String, issues_count: usize },
    NotFound,
    TimedOut,
    /// 5xx or network failure.
    Error,
}

pub struct OpRecord {
    pub key: String,
    pub kind: OpKind,
    pub outcome: OpOutcome,
}

pub struct History(pub Vec<OpRecord>);

pub enum ViolationKind {
    /// Two successful scans of the same key disagree on the stored tag, even
    /// though the simulated upstream always serves identical content per key.
    TagMismatch { first: String, second: String },
    /// Two successful scans of the same key disagree on the issue count.
    ResultsMismatch { first: usize, second: usize },
}

pub struct Violation {
    pub key: String,
    pub kind: ViolationKind,
}

impl History {
    /// Every successful scan of a key must agree on tag and result shape,
    /// since `StressFetcher` serves stable content per key. Disagreement
    /// means two nodes raced past the distributed lock and clobbered each
    /// other's write, or a stale row leaked past the freshness check.
    pub fn check_correctness(&self) -> Vec<Violation> {
        let mut seen: HashMap<&str, (&str, usize)> = HashMap::new();
        let mut violations = Vec::new();

        for record in &self.0 {
            let OpOutcome::ResultsOk { tag, issues_count } = &record.outcome else {
                continue;
            };

            match seen.get(record.key.as_str()) {
                None => {
                    seen.insert(&record.key, (tag.as_str(), *issues_count));
                }
                Some(&(prev_tag, prev_count)) => {
                    if prev_tag != tag.as_str() {
                        violations.push(Violation {
                            key: record.key.clone(),
                            kind: ViolationKind::TagMismatch {
                                first: prev_tag.to_string(),
                                second: tag.clone(),
                            },
                        });
                    } else if prev_count != *issues_count {
                        violations.push(Violation {
                            key: record.key.clone(),
                            kind: ViolationKind::ResultsMismatch {
                                first: prev_count,
                                second: *issues_count,
                            },
                        });
                    }
                }
            }
        }

        violations
    }
}
