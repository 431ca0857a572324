//! Core library for the torque-wizard application.
//!
//! This library contains the session data model, the capture and session
//! state machines, and the artifact generators for the screw-torque test
//! workflow. It is used by the terminal wizard binary and by integration
//! tests; a GUI front end would drive the same [`wizard::Operator`] seam.

pub mod annotation;
pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod render;
pub mod report;
pub mod results;
pub mod session;
pub mod wizard;
