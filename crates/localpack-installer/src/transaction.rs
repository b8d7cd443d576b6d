use std::fmt;

use tracing::{debug, warn};

type UndoAction = Box<dyn FnOnce() -> anyhow::Result<()>>;

struct CompensatingAction {
    description: String,
    undo: UndoAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    pub description: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub attempted: usize,
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Stack of compensating actions for one install attempt.
///
/// `commit` and `rollback` consume the transaction, so nothing can be
/// registered once it has finished. Dropping an active transaction rolls
/// it back.
pub struct Transaction {
    label: String,
    actions: Vec<CompensatingAction>,
    state: TransactionState,
}

impl Transaction {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            actions: Vec::new(),
            state: TransactionState::Active,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn descriptions(&self) -> Vec<&str> {
        self.actions
            .iter()
            .map(|action| action.description.as_str())
            .collect()
    }

    /// Registers the undo step for a mutation that has just been applied.
    pub fn add<F>(&mut self, description: impl Into<String>, undo: F)
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        assert_eq!(
            self.state,
            TransactionState::Active,
            "compensating action registered on a finished transaction"
        );
        let description = description.into();
        debug!(transaction = %self.label, step = %description, "registered compensating action");
        self.actions.push(CompensatingAction {
            description,
            undo: Box::new(undo),
        });
    }

    /// Discards every registered action.
    pub fn commit(mut self) {
        debug!(
            transaction = %self.label,
            actions = self.actions.len(),
            "transaction committed"
        );
        self.actions.clear();
        self.state = TransactionState::Committed;
    }

    /// Runs every registered action once, newest first. A failing action
    /// is logged and recorded; the remaining actions still run.
    pub fn rollback(mut self) -> RollbackReport {
        self.unwind()
    }

    fn unwind(&mut self) -> RollbackReport {
        let actions = std::mem::take(&mut self.actions);
        self.state = TransactionState::RolledBack;

        let mut report = RollbackReport {
            attempted: actions.len(),
            failures: Vec::new(),
        };
        for action in actions.into_iter().rev() {
            match (action.undo)() {
                Ok(()) => {
                    debug!(transaction = %self.label, step = %action.description, "rolled back");
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(
                        transaction = %self.label,
                        step = %action.description,
                        error = %error,
                        "rollback step failed"
                    );
                    report.failures.push(RollbackFailure {
                        description: action.description,
                        error,
                    });
                }
            }
        }
        report
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("actions", &self.descriptions())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active && !self.actions.is_empty() {
            warn!(
                transaction = %self.label,
                actions = self.actions.len(),
                "transaction dropped while active; rolling back"
            );
            self.unwind();
        }
    }
}
