//! Operator-pending state machine and dot-repeat recording.
//!
//! An operator key puts the engine into the pending state; the following
//! motion resolves to a byte range which completes the operator, invoking
//! its handler and recording the operation for `.`-repeat.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::ByteRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Delete,
    Change,
    Yank,
    Indent,
    Unindent,
    Lowercase,
    Uppercase,
    ToggleCase,
    Custom(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Delete => "delete",
            Operator::Change => "change",
            Operator::Yank => "yank",
            Operator::Indent => "indent",
            Operator::Unindent => "unindent",
            Operator::Lowercase => "lowercase",
            Operator::Uppercase => "uppercase",
            Operator::ToggleCase => "toggle_case",
            Operator::Custom(name) => name,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OperatorError {
    #[error("no pending operator")]
    NoPendingOperator,
    #[error("no operation to repeat")]
    NoOperationToRepeat,
}

/// Everything a handler gets when a pending operator resolves.
pub struct OperatorInvocation<'a> {
    pub operator: &'a Operator,
    pub range: ByteRange,
    pub count: usize,
    pub motion: Option<&'a str>,
}

pub type OperatorHandler = Box<dyn FnMut(&OperatorInvocation)>;

struct PendingOperator {
    operator: Operator,
    count: usize,
    handler: OperatorHandler,
    started_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedRange {
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedOperation {
    pub operator: String,
    pub count: usize,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<RecordedRange>,
    #[serde(skip)]
    pub replacement: Option<String>,
    #[serde(skip)]
    pub metadata: Option<String>,
}

#[derive(Default)]
pub struct OperatorEngine {
    pending: Option<PendingOperator>,
    last: Option<RecordedOperation>,
    history: Vec<RecordedOperation>,
}

impl OperatorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter operator-pending state. A second operator while one is already
    /// pending restarts the pending state with the new operator.
    pub fn start_operator(&mut self, operator: Operator, count: usize, handler: OperatorHandler) {
        if let Some(prev) = self.pending.take() {
            log::debug!(
                "operator {} was pending, replaced by {}",
                prev.operator.as_str(),
                operator.as_str()
            );
        }
        self.pending = Some(PendingOperator {
            operator,
            count: count.max(1),
            handler,
            started_at: Instant::now(),
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_operator(&self) -> Option<&Operator> {
        self.pending.as_ref().map(|p| &p.operator)
    }

    /// How long the current operator has been awaiting its motion.
    pub fn pending_since(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.started_at)
    }

    /// Resolve the pending operator with the range produced by a motion.
    /// Invokes the handler, then records the operation as the last one and
    /// appends it to the history.
    pub fn complete_operator(
        &mut self,
        range: ByteRange,
        motion: Option<&str>,
    ) -> Result<(), OperatorError> {
        let mut pending = self.pending.take().ok_or(OperatorError::NoPendingOperator)?;

        let invocation = OperatorInvocation {
            operator: &pending.operator,
            range,
            count: pending.count,
            motion,
        };
        (pending.handler)(&invocation);

        let record = RecordedOperation {
            operator: pending.operator.as_str().to_string(),
            count: pending.count,
            timestamp_ms: timestamp_ms(),
            range: Some(RecordedRange {
                start: range.start,
                end: range.end,
                motion: motion.map(str::to_string),
            }),
            replacement: None,
            metadata: None,
        };
        self.last = Some(record.clone());
        self.history.push(record);
        Ok(())
    }

    /// Leave operator-pending state without recording anything.
    pub fn cancel_operator(&mut self) -> Result<(), OperatorError> {
        match self.pending.take() {
            Some(_) => Ok(()),
            None => Err(OperatorError::NoPendingOperator),
        }
    }

    /// Attach the text inserted after a change operator to the last record,
    /// so a repeat can replay the replacement.
    pub fn set_last_replacement(&mut self, replacement: impl Into<String>) {
        let replacement = replacement.into();
        if let Some(last) = &mut self.last {
            last.replacement = Some(replacement.clone());
        }
        if let Some(last) = self.history.last_mut() {
            last.replacement = Some(replacement);
        }
    }

    /// Re-invoke `executor` once on the last recorded operation.
    pub fn repeat_last<F>(&self, executor: F) -> Result<(), OperatorError>
    where
        F: FnMut(&RecordedOperation),
    {
        self.repeat_last_n(1, executor)
    }

    /// Re-invoke `executor` on the last recorded operation `n` times.
    pub fn repeat_last_n<F>(&self, n: usize, mut executor: F) -> Result<(), OperatorError>
    where
        F: FnMut(&RecordedOperation),
    {
        let last = self.last.as_ref().ok_or(OperatorError::NoOperationToRepeat)?;
        for _ in 0..n {
            executor(last);
        }
        Ok(())
    }

    pub fn last_operation(&self) -> Option<&RecordedOperation> {
        self.last.as_ref()
    }

    pub fn history(&self) -> &[RecordedOperation] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// `[{operator, count, timestamp, range?{start,end,motion}}, ...]`
    pub fn export_history_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.history)
    }
}

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_complete_invokes_handler_and_records() {
        let mut engine = OperatorEngine::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        engine.start_operator(
            Operator::Delete,
            2,
            Box::new(move |inv| {
                sink.borrow_mut()
                    .push((inv.operator.clone(), inv.range, inv.count));
            }),
        );
        assert!(engine.is_pending());

        engine
            .complete_operator(ByteRange::new(3, 9), Some("word"))
            .unwrap();

        assert!(!engine.is_pending());
        assert_eq!(
            seen.borrow().as_slice(),
            &[(Operator::Delete, ByteRange::new(3, 9), 2)]
        );

        let last = engine.last_operation().unwrap();
        assert_eq!(last.operator, "delete");
        assert_eq!(last.count, 2);
        assert_eq!(
            last.range,
            Some(RecordedRange {
                start: 3,
                end: 9,
                motion: Some("word".to_string()),
            })
        );
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_complete_without_pending() {
        let mut engine = OperatorEngine::new();
        assert_eq!(
            engine.complete_operator(ByteRange::point(0), None),
            Err(OperatorError::NoPendingOperator)
        );
    }

    #[test]
    fn test_cancel_discards_pending() {
        let mut engine = OperatorEngine::new();
        engine.start_operator(Operator::Yank, 1, Box::new(|_| {}));
        engine.cancel_operator().unwrap();
        assert!(!engine.is_pending());
        assert!(engine.last_operation().is_none());
        assert!(engine.history().is_empty());
        assert_eq!(
            engine.cancel_operator(),
            Err(OperatorError::NoPendingOperator)
        );
    }

    #[test]
    fn test_restart_replaces_pending() {
        let mut engine = OperatorEngine::new();
        engine.start_operator(Operator::Delete, 1, Box::new(|_| {}));
        engine.start_operator(Operator::Change, 1, Box::new(|_| {}));
        assert_eq!(engine.pending_operator(), Some(&Operator::Change));
    }

    #[test]
    fn test_repeat_last_n() {
        let mut engine = OperatorEngine::new();
        engine.start_operator(Operator::Delete, 1, Box::new(|_| {}));
        engine
            .complete_operator(ByteRange::new(0, 3), Some("word"))
            .unwrap();

        let mut calls = 0;
        engine
            .repeat_last_n(3, |op| {
                assert_eq!(op.operator, "delete");
                calls += 1;
            })
            .unwrap();
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_repeat_without_history() {
        let engine = OperatorEngine::new();
        assert_eq!(
            engine.repeat_last(|_| {}),
            Err(OperatorError::NoOperationToRepeat)
        );
    }

    #[test]
    fn test_history_and_export() {
        let mut engine = OperatorEngine::new();
        for operator in [Operator::Delete, Operator::Yank] {
            engine.start_operator(operator, 1, Box::new(|_| {}));
            engine
                .complete_operator(ByteRange::new(1, 4), Some("line"))
                .unwrap();
        }
        assert_eq!(engine.history().len(), 2);

        let json = engine.export_history_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["operator"], "delete");
        assert_eq!(entries[1]["operator"], "yank");
        assert_eq!(entries[0]["count"], 1);
        assert!(entries[0]["timestamp"].is_u64());
        assert_eq!(entries[0]["range"]["start"], 1);
        assert_eq!(entries[0]["range"]["end"], 4);
        assert_eq!(entries[0]["range"]["motion"], "line");
        // replacement and metadata never leave the process
        assert!(entries[0].get("replacement").is_none());

        engine.clear_history();
        assert!(engine.history().is_empty());
        // the last operation survives a history clear
        assert!(engine.last_operation().is_some());
    }

    #[test]
    fn test_set_last_replacement() {
        let mut engine = OperatorEngine::new();
        engine.start_operator(Operator::Change, 1, Box::new(|_| {}));
        engine
            .complete_operator(ByteRange::new(0, 5), Some("word"))
            .unwrap();
        engine.set_last_replacement("new text");
        assert_eq!(
            engine.last_operation().unwrap().replacement.as_deref(),
            Some("new text")
        );
        assert_eq!(
            engine.history()[0].replacement.as_deref(),
            Some("new text")
        );
    }
}
