//! Core utilities: clocks, schedule dates and fixed-point money

pub mod money;
pub mod time;
