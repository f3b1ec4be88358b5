//! Engine-specific helpers: ast-grep rule inspection and the filemod driver.

pub mod ast_grep;
pub mod filemod;

pub use filemod::{
    execute_filemod, run_repomod, Filemod, FilemodApi, FilemodCommand, FilemodObserver,
    FinishCommand, RepomodRun,
};
