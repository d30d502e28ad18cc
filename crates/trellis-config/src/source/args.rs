//! Command-line override source.
//!
//! Only `--set provider.option=value` and `--set=provider.option=value`
//! tokens are consumed; every other argument belongs to the host's own CLI
//! and is ignored here.

use std::ffi::OsString;

use crate::error::SourceError;
use crate::value::RawValue;

use super::{ConfigSource, SourceEntries, priority, split_dotted_key};

const SET_FLAG: &str = "--set";

/// Source built from command-line `--set` overrides.
#[derive(Debug, Clone)]
pub struct ArgsSource {
    priority: u32,
    assignments: Vec<String>,
}

impl ArgsSource {
    /// Collects `--set` assignments from an argument list.
    #[must_use]
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        let mut assignments = Vec::new();
        let mut expecting_value = false;
        for raw in args {
            let argument = raw.into().to_string_lossy().into_owned();
            if expecting_value {
                assignments.push(argument);
                expecting_value = false;
                continue;
            }
            match argument.split_once('=') {
                Some((SET_FLAG, assignment)) => assignments.push(assignment.to_owned()),
                _ if argument == SET_FLAG => expecting_value = true,
                _ => {}
            }
        }
        Self {
            priority: priority::COMMAND_LINE,
            assignments,
        }
    }

    /// Changes the precedence rank.
    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

impl ConfigSource for ArgsSource {
    fn name(&self) -> &str {
        "command-line"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn load(&self) -> Result<SourceEntries, SourceError> {
        let mut entries = SourceEntries::new();
        for assignment in &self.assignments {
            let (key, value) = assignment.split_once('=').ok_or_else(|| {
                SourceError::malformed(
                    self.name(),
                    format!("override '{assignment}' is missing '='"),
                )
            })?;
            let key = split_dotted_key(key).ok_or_else(|| {
                SourceError::malformed(
                    self.name(),
                    format!("override '{assignment}' must address provider.option"),
                )
            })?;
            entries.insert(key, RawValue::Text(value.to_owned()));
        }
        Ok(entries)
    }
}
