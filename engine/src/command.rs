//! Edit commands: undoable operations over an [`EditLedger`].
//!
//! Changes are expressed as commands, not direct mutations, so the
//! [`DataSource`](crate::DataSource) can keep undo/redo history.

use crate::{
    error::Result,
    record::{property_value, with_property},
    EditLedger, Record,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reversible edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EditCommand {
    /// Create a record
    Add { record: Record },
    /// Remove a record, given as currently displayed
    Remove { record: Record },
    /// Set one property of a record, given as currently displayed
    ReplaceValue {
        record: Record,
        property: String,
        value: Value,
    },
    /// Apply several commands as one; all or nothing
    Batch { commands: Vec<EditCommand> },
}

impl EditCommand {
    /// Apply the command to a ledger.
    pub fn apply(&self, ledger: &mut EditLedger) -> Result<()> {
        match self {
            EditCommand::Add { record } => ledger.add_data(record.clone()),
            EditCommand::Remove { record } => ledger.remove_data(record.clone()),
            EditCommand::ReplaceValue {
                record,
                property,
                value,
            } => ledger.replace_value(record, property, value.clone()),
            EditCommand::Batch { commands } => {
                in_multi_edit(ledger, commands.iter(), |command, ledger| command.apply(ledger))
            }
        }
    }

    /// Undo the effect of a previous successful `apply`.
    pub fn revert(&self, ledger: &mut EditLedger) -> Result<()> {
        match self {
            EditCommand::Add { record } => ledger.remove_data(record.clone()),
            EditCommand::Remove { record } => ledger.add_data(record.clone()),
            EditCommand::ReplaceValue {
                record,
                property,
                value,
            } => {
                let current = with_property(record, property, value.clone());
                ledger.replace_value(&current, property, property_value(record, property))
            }
            EditCommand::Batch { commands } => in_multi_edit(
                ledger,
                commands.iter().rev(),
                |command, ledger| command.revert(ledger),
            ),
        }
    }

    /// Every record this command touches, batches flattened.
    pub fn records(&self) -> Vec<&Record> {
        match self {
            EditCommand::Add { record }
            | EditCommand::Remove { record }
            | EditCommand::ReplaceValue { record, .. } => vec![record],
            EditCommand::Batch { commands } => {
                commands.iter().flat_map(EditCommand::records).collect()
            }
        }
    }
}

/// Run `step` over `commands` inside a multi-edit, rolling back on failure.
fn in_multi_edit<'a>(
    ledger: &mut EditLedger,
    commands: impl Iterator<Item = &'a EditCommand>,
    step: impl Fn(&EditCommand, &mut EditLedger) -> Result<()>,
) -> Result<()> {
    ledger.begin_multi_edit();
    for command in commands {
        if let Err(err) = step(command, ledger) {
            ledger.cancel_multi_edit();
            return Err(err);
        }
    }
    ledger.end_multi_edit();
    Ok(())
}

/// Accumulates commands into one.
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    commands: Vec<EditCommand>,
}

impl CommandBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record.
    pub fn add_data(self, record: Record) -> Self {
        self.push(EditCommand::Add { record })
    }

    /// Remove a record.
    pub fn remove_data(self, record: Record) -> Self {
        self.push(EditCommand::Remove { record })
    }

    /// Replace one property of a record.
    pub fn replace_value(self, record: Record, property: impl Into<String>, value: Value) -> Self {
        self.push(EditCommand::ReplaceValue {
            record,
            property: property.into(),
            value,
        })
    }

    /// Append an already built command.
    pub fn push(mut self, command: EditCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Number of accumulated commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was accumulated.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Finish building. A single command is returned as is.
    pub fn into_command(mut self) -> EditCommand {
        if self.commands.len() == 1 {
            if let Some(command) = self.commands.pop() {
                return command;
            }
        }
        EditCommand::Batch {
            commands: self.commands,
        }
    }
}
