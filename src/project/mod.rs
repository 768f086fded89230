pub mod event;
pub mod executor;
pub mod generator;
pub mod provision;
pub mod runner;
pub mod state;
pub mod state_saver;
pub mod status;
pub mod tree;

pub use event::{OutputEvent, OutputKind};
pub use executor::{CommandExecutor, CommandLine, ExecError};
pub use provision::{ProvisionError, ProvisionRequest, ProvisionStage, Provisioned, Provisioner};
pub use runner::{ProcessRunner, RunError};
pub use state::{AppState, Framework, Project, SharedAppState};
pub use status::{RunBoard, RunStatus};
pub use tree::{build_tree, FileNode, NodeKind};
