#![forbid(unsafe_code)]

pub mod countdown;
pub mod pipeline;
pub mod push;
pub mod reload;
pub mod timers;
pub mod version;
