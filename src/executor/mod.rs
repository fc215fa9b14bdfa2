pub mod coordinator;
pub mod input;
pub mod text_input;
