pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod planner;
pub mod prompts;
pub mod retry;
pub mod state;
