pub mod action;
pub mod scheduler;


pub use action::{ActionKind, BackgroundAction, BackgroundActionSet, KEYCODE_PRESETS};
pub use scheduler::{BackgroundScheduler, ScheduleState};
