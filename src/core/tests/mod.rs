
mod scheduler;
mod state_machine;
