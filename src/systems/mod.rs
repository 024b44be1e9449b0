//! Ready-made boards.

pub mod demo_board;

pub use demo_board::{build as build_demo_board, countdown_program, DemoBoard};
