//! Features: self-contained units owning their slice of state and the jobs that fill it.

pub mod modules;
pub mod root_modules;
pub mod variables;

pub use modules::ModulesFeature;
pub use root_modules::RootModulesFeature;
pub use variables::VariablesFeature;
