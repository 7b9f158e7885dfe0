mod assign;
mod dtype;
mod variable;

pub use assign::{AssignHook, HookGuard, hook_depth, install, update};
pub use dtype::DType;
pub use variable::{VarId, Variable};
