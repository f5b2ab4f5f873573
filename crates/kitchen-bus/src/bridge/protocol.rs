//! Command lines understood by the worker.
//!
//! A request is a single ASCII line: a verb, then space separated arguments.
//! Free text arguments are joined with `|`. The worker answers every line with
//! exactly one JSON document on its own line. There is no request identifier,
//! so responses can only be matched to commands by order.

use std::fmt;

/// Line that makes the worker exit cleanly.
pub const QUIT_LINE: &str = "QUIT";

/// Separator between free text arguments.
pub const FIELD_DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("command line is empty")]
    Empty,
    #[error("{field} must not contain a line break")]
    LineBreak { field: &'static str },
    #[error("{field} must not contain '|'")]
    Delimiter { field: &'static str },
}

/// A validated command line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    /// Accept an arbitrary line as long as it fits on one line.
    ///
    /// Blank lines are rejected: the worker skips them without answering, so
    /// the caller would only ever see a timeout.
    pub fn raw(line: impl Into<String>) -> Result<Self, CommandError> {
        let line = line.into();
        if has_line_break(&line) {
            return Err(CommandError::LineBreak { field: "command" });
        }
        if line.trim().is_empty() {
            return Err(CommandError::Empty);
        }
        Ok(Self(line))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First word of the line, used as a log label.
    pub fn verb(&self) -> &str {
        self.0.split_whitespace().next().unwrap_or_default()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed form of the worker's verbs.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// Full state dump: catalog, inventory, recipes and orders.
    GetAll,
    AddCatalogItem { name: String, unit: String },
    DeleteCatalogItem { id: i64 },
    AddStock { id: i64, quantity: f64 },
    DeleteStock { id: i64 },
    AddRecipe { name: String, preparation: String },
    DeleteRecipe { id: i64 },
    AddRecipeIngredient { recipe_id: i64, ingredient_id: i64, quantity: f64 },
    EnqueueOrder { recipe_id: i64 },
    CancelOrder { id: i64 },
    /// Process the order at the head of the worker's queue.
    ProcessOrder,
    Quit,
}

impl WorkerCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::GetAll => "GET_ALL",
            Self::AddCatalogItem { .. } => "ADD_CATALOGO",
            Self::DeleteCatalogItem { .. } => "DEL_CATALOGO",
            Self::AddStock { .. } => "ADD_ESTOQUE",
            Self::DeleteStock { .. } => "DEL_ESTOQUE",
            Self::AddRecipe { .. } => "ADD_RECEITA",
            Self::DeleteRecipe { .. } => "DEL_RECEITA",
            Self::AddRecipeIngredient { .. } => "ADD_ING_RECEITA",
            Self::EnqueueOrder { .. } => "ADD_PEDIDO",
            Self::CancelOrder { .. } => "DEL_PEDIDO",
            Self::ProcessOrder => "PROCESSAR_PEDIDO",
            Self::Quit => QUIT_LINE,
        }
    }

    /// Render the wire line, rejecting text that would break framing.
    pub fn to_command(&self) -> Result<Command, CommandError> {
        let verb = self.verb();
        let line = match self {
            Self::GetAll | Self::ProcessOrder | Self::Quit => verb.to_string(),
            Self::AddCatalogItem { name, unit } => {
                format!("{verb} {}", text_pair(("name", name), ("unit", unit))?)
            }
            Self::AddRecipe { name, preparation } => {
                format!(
                    "{verb} {}",
                    text_pair(("name", name), ("preparo", preparation))?
                )
            }
            Self::DeleteCatalogItem { id }
            | Self::DeleteStock { id }
            | Self::DeleteRecipe { id }
            | Self::CancelOrder { id } => format!("{verb} {id}"),
            Self::EnqueueOrder { recipe_id } => format!("{verb} {recipe_id}"),
            Self::AddStock { id, quantity } => format!("{verb} {id} {quantity}"),
            Self::AddRecipeIngredient {
                recipe_id,
                ingredient_id,
                quantity,
            } => format!("{verb} {recipe_id} {ingredient_id} {quantity}"),
        };
        Command::raw(line)
    }
}

impl TryFrom<WorkerCommand> for Command {
    type Error = CommandError;

    fn try_from(value: WorkerCommand) -> Result<Self, Self::Error> {
        value.to_command()
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

fn text_pair(
    (left_name, left): (&'static str, &str),
    (right_name, right): (&'static str, &str),
) -> Result<String, CommandError> {
    for (field, value) in [(left_name, left), (right_name, right)] {
        if has_line_break(value) {
            return Err(CommandError::LineBreak { field });
        }
        if value.contains(FIELD_DELIMITER) {
            return Err(CommandError::Delimiter { field });
        }
    }
    Ok(format!("{left}{FIELD_DELIMITER}{right}"))
}
