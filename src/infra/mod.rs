mod main_program;
pub use main_program::MainProgram;
