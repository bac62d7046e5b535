//! Interpreter scenario tests
//!
//! Whole workflows run through the engine against stub activities

mod fetch_tests;
mod helpers;
