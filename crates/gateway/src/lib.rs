pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod settings;
pub mod state;
