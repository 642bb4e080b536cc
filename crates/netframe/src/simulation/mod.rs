mod clock;
mod command;

pub use clock::{
    ClockConfig, ClockError, DEFAULT_RENDER_DELAY_MS, DEFAULT_SIM_DT_MS, DEFAULT_SIM_LEAD_MS,
    MAX_FIXED_UPDATES_PER_TICK, TimeBase,
};
pub use command::{Buttons, CommandRing, DEFAULT_COMMAND_CAPACITY, UserCommand};
