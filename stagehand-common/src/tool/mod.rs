//! The external provisioning tool: processes, verbs, variables.

mod command;
mod provisioner;
mod vars;
mod verb;

pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, TIMEOUT_EXIT_CODE};
pub use provisioner::Provisioner;
pub use vars::{VAR_FILE_NAME, VarFile};
pub use verb::{Verb, VerbFlags};
