pub mod cli;
pub mod delete;
pub mod run;
pub mod upload;
