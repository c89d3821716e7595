#![forbid(unsafe_code)]

pub mod console;
pub mod health;
pub mod listener;
pub mod room;
pub mod room_service;
pub mod session;


#[cfg(test)]
mod session_tests;
